//! Report rendering: human-readable tables or CSV rows over the engine's
//! structured results, plus the detected-topology display.

use crate::core::config::RunConfig;
use crate::runtime::stats::{bandwidth_gbs, iteration_spread};
use crate::runtime::{DeviceContext, TestResult, TransferReport};

pub const CSV_HEADER: &str =
    "Test#,Transfer#,NumBytes,Src,Exe,Dst,CUs,BW(GB/s),Time(ms),SrcAddr,DstAddr";

fn addr_list(addrs: &[u64]) -> String {
    addrs
        .iter()
        .map(|a| format!("{:#x}", a))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_iteration_details(report: &TransferReport) {
    let spread = iteration_spread(report.num_bytes, &report.per_iteration_ms);

    // Iterations sorted fastest first, keeping their original number.
    let mut order: Vec<usize> = (0..report.per_iteration_ms.len()).collect();
    order.sort_by(|&a, &b| {
        report.per_iteration_ms[a]
            .partial_cmp(&report.per_iteration_ms[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for i in order {
        let ms = report.per_iteration_ms[i];
        print!(
            "      Iter {:03}    | {:7.3} GB/s | {:8.3} ms |",
            i + 1,
            bandwidth_gbs(report.num_bytes, ms),
            ms
        );
        if let Some(slots) = report.per_iteration_slots.get(i) {
            if !slots.is_empty() {
                print!(" Slots:");
                for &(die, slot) in slots {
                    print!(" {:02}:{:02}", die, slot);
                }
            }
        }
        println!();
    }
    println!(
        "      StandardDev | {:7.3} GB/s | {:8.3} ms |",
        spread.bandwidth.std_dev, spread.time_ms.std_dev
    );
}

/// Render one test result in the configured output mode.
pub fn print_test_result(cfg: &RunConfig, result: &TestResult) {
    if result.validation_failed && result.num_timed_iterations == 0 {
        println!(
            "[ERROR] Test {} aborted before timing: source validation failed",
            result.test_num
        );
        return;
    }

    if cfg.output_csv {
        for t in &result.transfers {
            println!(
                "{},{},{},{},{},{},{},{:.3},{:.3},{},{}",
                result.test_num,
                t.index,
                t.num_bytes,
                t.src,
                t.exe,
                t.dst,
                t.num_sub_execs,
                t.bandwidth_gbs,
                t.mean_ms,
                addr_list(&t.src_addrs),
                addr_list(&t.dst_addrs),
            );
        }
        for agent in result.agents.iter().filter(|a| a.folded) {
            println!(
                "{},ALL,{},ALL,{},ALL,{},{:.3},{:.3},ALL,ALL",
                result.test_num,
                agent.total_bytes,
                agent.key,
                agent.total_sub_execs,
                agent.bandwidth_gbs,
                agent.mean_ms,
            );
        }
        println!(
            "{},ALL,{},ALL,ALL,ALL,ALL,{:.3},{:.3},ALL,ALL",
            result.test_num, result.total_bytes, result.cpu_bandwidth_gbs, result.cpu_time_ms
        );
        return;
    }

    println!("Test {}:", result.test_num);
    if result.agents.iter().any(|a| a.folded) {
        for agent in &result.agents {
            println!(
                " Executor: {:>4} | {:7.3} GB/s | {:8.3} ms | {:12} bytes",
                agent.key, agent.bandwidth_gbs, agent.mean_ms, agent.total_bytes
            );
            for &i in &agent.transfer_indices {
                let t = &result.transfers[i];
                println!(
                    "     Transfer {:02} | {:7.3} GB/s | {:8.3} ms | {:12} bytes | {} -> {}:{:03} -> {}",
                    t.index, t.bandwidth_gbs, t.mean_ms, t.num_bytes, t.src, t.exe,
                    t.num_sub_execs, t.dst
                );
                if cfg.show_iterations {
                    print_iteration_details(t);
                }
            }
        }
    } else {
        for t in &result.transfers {
            println!(
                " Transfer {:02}     | {:7.3} GB/s | {:8.3} ms | {:12} bytes | {} -> {}:{:03} -> {}",
                t.index, t.bandwidth_gbs, t.mean_ms, t.num_bytes, t.src, t.exe,
                t.num_sub_execs, t.dst
            );
            if cfg.show_iterations {
                print_iteration_details(t);
            }
        }
    }
    println!(
        " Aggregate (CPU) | {:7.3} GB/s | {:8.3} ms | {:12} bytes | Overhead: {:.3} ms",
        result.cpu_bandwidth_gbs, result.cpu_time_ms, result.total_bytes, result.overhead_ms
    );
    if result.validation_failed {
        println!("[ERROR] Test {} failed validation", result.test_num);
    }
}

/// Display the detected (or injected) topology the way the CLI shows it
/// before a run.
pub fn print_topology(ctx: &DeviceContext, csv: bool) {
    let topo = ctx.topology.as_ref();
    let num_cpus = ctx.num_cpu_devices();
    let num_gpus = ctx.num_gpu_devices();

    if csv {
        println!("NumCpus,{}", num_cpus);
        println!("NumGpus,{}", num_gpus);
    } else {
        println!(
            "\nDetected topology: {} configured CPU NUMA node(s) [{} total]   {} GPU device(s)",
            num_cpus,
            topo.num_cpu_nodes(),
            num_gpus
        );
    }

    // NUMA distance table.
    if !csv {
        print!("            |");
        for j in 0..num_cpus {
            print!("NUMA {:02}|", j);
        }
        println!(" #Cpus | Closest GPU(s)");
        print!("------------+");
        for _ in 0..=num_cpus {
            print!("-------+");
        }
        println!("---------------");
    }
    for i in 0..num_cpus {
        let node_i = ctx.map.cpu(i);
        print!("NUMA {:02} ({:02}){}", i, node_i, if csv { "," } else { "|" });
        for j in 0..num_cpus {
            let dist = topo.numa_distance(node_i, ctx.map.cpu(j));
            if csv {
                print!("{},", dist);
            } else {
                print!(" {:5} |", dist);
            }
        }
        if csv {
            print!("{},", topo.cpus_on_node(node_i));
        } else {
            print!(" {:5} | ", topo.cpus_on_node(node_i));
        }
        let close: Vec<String> = (0..num_gpus)
            .filter(|&g| topo.closest_node_to_gpu(ctx.map.gpu(g)) == node_i)
            .map(|g| g.to_string())
            .collect();
        println!("{}", close.join(","));
    }
    println!();

    // GPU link table.
    if !csv {
        print!("        |");
        for j in 0..num_gpus {
            print!(" GPU {:02} |", j);
        }
        println!(" #CUs | Closest NUMA");
        for _ in 0..=num_gpus {
            print!("--------+");
        }
        println!("------+-------------");
    }
    for i in 0..num_gpus {
        let gpu_i = ctx.map.gpu(i);
        print!(" GPU {:02} {}", i, if csv { "," } else { "|" });
        for j in 0..num_gpus {
            if i == j {
                print!("{}", if csv { "-," } else { "    -   |" });
                continue;
            }
            let (kind, hops) = topo.gpu_link(gpu_i, ctx.map.gpu(j));
            if csv {
                print!("{}-{},", kind.label(), hops);
            } else {
                print!(" {:>4}-{} |", kind.label(), hops);
            }
        }
        if csv {
            println!(
                "{},{}",
                topo.gpu_cu_count(gpu_i),
                topo.closest_node_to_gpu(gpu_i)
            );
        } else {
            println!(
                " {:4} | {}",
                topo.gpu_cu_count(gpu_i),
                topo.closest_node_to_gpu(gpu_i)
            );
        }
    }
}
