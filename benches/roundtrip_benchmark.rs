// benches/roundtrip_benchmark.rs
use std::error::Error;
use std::io::{self, Cursor, Write};
use std::time::{Duration, Instant};

use ndarchive::{load, save, savez_with, Array, ArrayHandle, CompressionAlgo, WriteOptions};
use rand::Rng;

const ITERATIONS: u32 = 5;

struct BenchProfile {
    name: &'static str,
    compression: CompressionAlgo,
}

struct BenchResult {
    profile_name: &'static str,
    archive_size: usize,
    save_time: Duration,
    load_time: Duration,
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("--- Starting Round-Trip Benchmark ---");
    io::stdout().flush()?;

    let mut rng = rand::thread_rng();
    // Half noise, half smooth ramp: something for the compressors to find.
    let noise: Vec<f32> = (0..512 * 512).map(|_| rng.gen()).collect();
    let ramp: Vec<f32> = (0..512 * 512).map(|i| (i / 64) as f32).collect();
    let noise = Array::from_vec(vec![512, 512], noise)?;
    let ramp = Array::from_vec(vec![512, 512], ramp)?;
    let raw_size = noise.as_bytes().len() + ramp.as_bytes().len();
    println!("Payload: 2 x float32[512, 512] ({} bytes)\n", raw_size);

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let mut bytes = Vec::new();
        save(&mut bytes, &noise)?;
        load(Cursor::new(bytes), false)?.into_array()?;
    }
    println!("Single record save+load: {:?} per iteration\n", start.elapsed() / ITERATIONS);

    let profiles = [
        BenchProfile { name: "store", compression: CompressionAlgo::Store },
        BenchProfile { name: "deflate (default)", compression: CompressionAlgo::standard() },
        BenchProfile { name: "deflate (L9)", compression: CompressionAlgo::Deflate { level: Some(9) } },
        BenchProfile { name: "zstd (L3)", compression: CompressionAlgo::Zstd { level: Some(3) } },
        BenchProfile { name: "zstd (L19)", compression: CompressionAlgo::Zstd { level: Some(19) } },
    ];

    let mut results = Vec::new();
    for profile in &profiles {
        println!("--- Benchmarking Profile: {} ---", profile.name);
        io::stdout().flush()?;
        results.push(run_benchmark(profile, &[&noise, &ramp])?);
    }

    print_results_table(&results, raw_size);
    Ok(())
}

fn run_benchmark(profile: &BenchProfile, arrays: &[&dyn ArrayHandle]) -> Result<BenchResult, Box<dyn Error>> {
    let options = WriteOptions { compression: profile.compression };
    let mut archive_size = 0;
    let mut save_time = Duration::ZERO;
    let mut load_time = Duration::ZERO;

    for _ in 0..ITERATIONS {
        let start = Instant::now();
        let bytes = savez_with(Cursor::new(Vec::new()), arrays, &[], options.clone())?.into_inner();
        save_time += start.elapsed();
        archive_size = bytes.len();

        let start = Instant::now();
        let mut archive = load(Cursor::new(bytes), false)?.into_archive()?;
        for key in archive.keys().into_iter().map(String::from).collect::<Vec<_>>() {
            archive.get(&key)?;
        }
        archive.close();
        load_time += start.elapsed();
    }

    Ok(BenchResult {
        profile_name: profile.name,
        archive_size,
        save_time: save_time / ITERATIONS,
        load_time: load_time / ITERATIONS,
    })
}

fn print_results_table(results: &[BenchResult], raw_size: usize) {
    println!("\n--- Benchmark Results ({} iterations) ---", ITERATIONS);
    println!(
        "{:<20} | {:>12} | {:>7} | {:>12} | {:>12}",
        "Profile", "Size (B)", "Ratio", "Save", "Load"
    );
    println!("{:-<20}-+-{:->12}-+-{:->7}-+-{:->12}-+-{:->12}", "", "", "", "", "");
    for r in results {
        println!(
            "{:<20} | {:>12} | {:>6.1}% | {:>12.2?} | {:>12.2?}",
            r.profile_name,
            r.archive_size,
            r.archive_size as f64 / raw_size as f64 * 100.0,
            r.save_time,
            r.load_time
        );
    }
}
