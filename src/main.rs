//! shm-fifo - benchmark Fifo di atas shared segment
//!
//! - Single-thread: latency write/read dalam satu mapping
//! - Multi-producer: beberapa rank menulis ke satu receive fifo, masing-masing
//!   lewat mapping sendiri
//!
//! Usage:
//!   cargo run --release -- [--iterations N] [--producers N] [--spin busy|backoff]

use std::error::Error;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use shm_fifo::config::{FifoConfig, SegmentConfig, SpinPolicy};
use shm_fifo::core::{write_to_endpoint, FragmentPool, SegmentTable, ShmSegment, FRAGMENTS_OFFSET};
use shm_fifo::trace::init_tracing;
use shm_fifo::TranslateError;

const FRAGMENT_SIZE: usize = 64;

/// Benchmark configuration
struct BenchConfig {
    iterations: usize,
    producers: u32,
    fifo: FifoConfig,
    dir: PathBuf,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: 1_000_000,
            producers: 3,
            fifo: FifoConfig::from_env(),
            dir: std::env::temp_dir(),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let config = parse_args();

    println!("🚀 shm-fifo - Lock-Free Shared-Memory Fifo");
    println!("==========================================\n");

    benchmark_single_thread(&config)?;
    benchmark_multi_producer(&config)?;

    println!("\n✅ All benchmarks complete!");
    Ok(())
}

fn segment_path(config: &BenchConfig, rank: u32) -> PathBuf {
    config
        .dir
        .join(format!("shm_fifo_bench_{}_{rank}.shm", std::process::id()))
}

fn create_segment(config: &BenchConfig, rank: u32, fragments: usize) -> Result<ShmSegment, Box<dyn Error>> {
    let segment_config = SegmentConfig {
        size: FRAGMENTS_OFFSET + fragments * FRAGMENT_SIZE,
        fragment_size: FRAGMENT_SIZE,
    };
    Ok(ShmSegment::create(segment_path(config, rank), rank, &segment_config)?)
}

fn benchmark_single_thread(config: &BenchConfig) -> Result<(), Box<dyn Error>> {
    println!("📊 Fifo Benchmark (single thread, {:?})", config.fifo.spin);
    println!("------------------------------------------");

    const BATCH: usize = 4096;
    let segment = create_segment(config, 0, BATCH)?;
    let mut table = SegmentTable::new(0);
    table.attach(&segment);
    let ep = table.endpoint(0)?;
    let fifo = segment.fifo();

    let rounds = (config.iterations / BATCH).max(1);
    let ops = rounds * BATCH;

    let mut write_ns = 0u128;
    let mut read_ns = 0u128;

    for _ in 0..rounds {
        let start = Instant::now();
        for i in 0..BATCH {
            if let Some(frag) = segment.fragment(i) {
                write_to_endpoint(&table, frag, &ep)?;
            }
        }
        write_ns += start.elapsed().as_nanos();

        let start = Instant::now();
        for _ in 0..BATCH {
            fifo.read_with(&table, config.fifo.spin);
        }
        read_ns += start.elapsed().as_nanos();
    }

    let write_op = write_ns as f64 / ops as f64;
    let read_op = read_ns as f64 / ops as f64;

    println!("  Operations: {}", ops);
    println!("  Write latency: {:.2} ns/op", write_op);
    println!("  Read latency:  {:.2} ns/op", read_op);
    println!(
        "  Throughput:    {:.2} M ops/sec\n",
        1_000.0 / (write_op + read_op)
    );

    drop(segment);
    std::fs::remove_file(segment_path(config, 0)).ok();
    Ok(())
}

fn benchmark_multi_producer(config: &BenchConfig) -> Result<(), Box<dyn Error>> {
    println!(
        "📊 Multi-Producer Benchmark ({} producers -> 1 consumer)",
        config.producers
    );
    println!("--------------------------------------------------");

    let per_producer = (config.iterations / config.producers.max(1) as usize).clamp(1, 1 << 20);

    let segments = (0..=config.producers)
        .map(|rank| create_segment(config, rank, if rank == 0 { 1 } else { per_producer }))
        .collect::<Result<Vec<_>, _>>()?;

    let mut consumer_table = SegmentTable::new(0);
    for segment in &segments {
        consumer_table.attach(segment);
    }

    // Setiap producer me-map ulang semua segment di base address sendiri
    let views = (1..=config.producers)
        .map(|_| segments.iter().map(ShmSegment::remap).collect::<Result<Vec<_>, _>>())
        .collect::<Result<Vec<_>, _>>()?;

    let total = per_producer * config.producers as usize;
    let spin = config.fifo.spin;
    let start = Instant::now();

    let received = thread::scope(|s| -> Result<usize, Box<dyn Error>> {
        let producers: Vec<_> = views
            .iter()
            .enumerate()
            .map(|(i, view)| {
                let rank = i as u32 + 1;
                s.spawn(move || -> Result<usize, TranslateError> {
                    let mut table = SegmentTable::new(rank);
                    for segment in view {
                        table.attach(segment);
                    }
                    let ep = table.endpoint(0)?;

                    let mut pool = FragmentPool::new(&view[rank as usize]);
                    let mut sent = 0;
                    while let Some(frag) = pool.allocate() {
                        write_to_endpoint(&table, frag, &ep)?;
                        sent += 1;
                    }
                    Ok(sent)
                })
            })
            .collect();

        let fifo = segments[0].fifo();
        let mut received = 0;
        loop {
            if fifo.read_with(&consumer_table, spin).is_some() {
                received += 1;
                continue;
            }
            if received == total {
                break;
            }
            if producers.iter().all(|p| p.is_finished()) {
                break;
            }
            std::hint::spin_loop();
        }

        let mut sent = 0;
        for producer in producers {
            sent += producer.join().map_err(|_| "producer thread panicked")??;
        }
        // Semua producer sudah di-join; sisa queue tidak akan bertambah lagi
        while fifo.read_with(&consumer_table, spin).is_some() {
            received += 1;
        }
        if received != sent {
            return Err(format!("received {received} of {sent} messages").into());
        }
        Ok(received)
    })?;

    let elapsed = start.elapsed();

    println!("  Messages: {}", received);
    println!("  Elapsed:  {:.2} ms", elapsed.as_secs_f64() * 1_000.0);
    println!(
        "  Throughput: {:.2} M msgs/sec",
        received as f64 / elapsed.as_secs_f64() / 1_000_000.0
    );

    drop(views);
    drop(consumer_table);
    drop(segments);
    for rank in 0..=config.producers {
        std::fs::remove_file(segment_path(config, rank)).ok();
    }
    Ok(())
}

fn parse_args() -> BenchConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = BenchConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--iterations" | "-n" => {
                if i + 1 < args.len() {
                    config.iterations = args[i + 1].parse().unwrap_or(1_000_000);
                    i += 1;
                }
            }
            "--producers" | "-p" => {
                if i + 1 < args.len() {
                    config.producers = args[i + 1].parse().unwrap_or(3).max(1);
                    i += 1;
                }
            }
            "--spin" => {
                if i + 1 < args.len() {
                    config.fifo.spin = args[i + 1].parse().unwrap_or(SpinPolicy::Busy);
                    i += 1;
                }
            }
            "--dir" | "-d" => {
                if i + 1 < args.len() {
                    config.dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("shm-fifo benchmark\n");
                println!("Usage: shm_fifo [OPTIONS]\n");
                println!("Options:");
                println!("  -n, --iterations <N>   Operations per benchmark (default: 1000000)");
                println!("  -p, --producers <N>    Producer ranks (default: 3)");
                println!("      --spin <POLICY>    busy | backoff (default: $SHM_FIFO_SPIN or busy)");
                println!("  -d, --dir <PATH>       Directory for segment files (default: temp dir)");
                println!("  -h, --help             Show this help");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}
