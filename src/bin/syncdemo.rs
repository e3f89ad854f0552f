// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Demonstrations of the synchronization primitives.
//
// Usage:
//   syncdemo race [--workers N] [--iterations M] [--unguarded]
//   syncdemo semaphore [--permits V] [--workers N] [--hold-ms MS]
//   syncdemo lock [--workers N] [--iterations M]
//   syncdemo cancel [--run-secs S] [--cancel-after-ms MS]
//   syncdemo args [--values ...]
//   syncdemo pipe [--fifo PATH] [--count N]
//   syncdemo shm [--name NAME] [--workers N] [--iterations M]
//
// Ctrl-C requests cancellation of every running worker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use libsync::pipe::{self, read_values, write_values};
use libsync::{
    Builder, Canceller, Coordinator, Fifo, Guarded, Outcome, Payload, Semaphore, SharedCounter,
    ShmGuarded,
};

#[derive(Parser)]
#[command(name = "syncdemo", version, about = "Locks, permits and cancellable workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// N workers each increment a shared counter M times
    Race {
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 100_000)]
        iterations: u64,
        /// Skip the lock and watch updates get lost
        #[arg(long)]
        unguarded: bool,
    },
    /// At most V of N workers inside a permit-bounded section
    Semaphore {
        #[arg(long, default_value_t = 2)]
        permits: u32,
        #[arg(long, default_value_t = 5)]
        workers: usize,
        #[arg(long, default_value_t = 200)]
        hold_ms: u64,
    },
    /// Workers mutate a guarded value through their cancellable context
    Lock {
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 5)]
        iterations: u64,
    },
    /// Cancel a long-running worker at a sleep
    Cancel {
        #[arg(long, default_value_t = 10)]
        run_secs: u64,
        #[arg(long, default_value_t = 3000)]
        cancel_after_ms: u64,
    },
    /// Consumed and shared payloads, and routine results
    Args {
        #[arg(long, num_args = 1.., default_values_t = [3, 1, 4, 1, 5])]
        values: Vec<i32>,
    },
    /// Send a run of integers through a pipe
    Pipe {
        /// Use a named FIFO at this path instead of an unnamed pipe
        #[arg(long)]
        fifo: Option<PathBuf>,
        #[arg(long, default_value_t = 8)]
        count: i32,
    },
    /// Threads share a counter in named shared memory
    Shm {
        #[arg(long, default_value = "syncdemo_counter")]
        name: String,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 1000)]
        iterations: u64,
    },
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let interrupt = Canceller::new();
    {
        let c = interrupt.clone();
        ctrlc::set_handler(move || {
            let n = c.cancel_all();
            tracing::info!(workers = n, "interrupt: cancellation requested");
        })
        .context("installing interrupt handler")?;
    }

    match cli.command {
        Command::Race {
            workers,
            iterations,
            unguarded,
        } => race(&interrupt, workers, iterations, unguarded),
        Command::Semaphore {
            permits,
            workers,
            hold_ms,
        } => semaphore(&interrupt, permits, workers, hold_ms),
        Command::Lock {
            workers,
            iterations,
        } => lock(&interrupt, workers, iterations),
        Command::Cancel {
            run_secs,
            cancel_after_ms,
        } => cancel(&interrupt, run_secs, cancel_after_ms),
        Command::Args { values } => args(values),
        Command::Pipe { fifo, count } => pipe_demo(fifo, count),
        Command::Shm {
            name,
            workers,
            iterations,
        } => shm(&interrupt, &name, workers, iterations),
    }
}

fn report<R: std::fmt::Debug, T>(results: &[(libsync::WorkerId, libsync::Joined<R, T>)]) {
    for (id, joined) in results {
        match &joined.outcome {
            Outcome::Finished(r) => println!("{id}: finished with {r:?}"),
            Outcome::Cancelled => println!("{id}: cancelled"),
            Outcome::Failed(f) => println!("{id}: failed: {f}"),
        }
    }
}

fn race(interrupt: &Canceller, workers: usize, iterations: u64, unguarded: bool) -> Result<()> {
    let counter = Arc::new(SharedCounter::new(0));
    let mut coord = Coordinator::<u64>::new("race").with_canceller(interrupt.clone());
    for _ in 0..workers {
        let counter = Arc::clone(&counter);
        coord.spawn(Payload::none(), move |ctx, _| {
            for i in 0..iterations {
                if i % 1024 == 0 {
                    ctx.test_cancel()?;
                }
                if unguarded {
                    counter.increment_unguarded();
                } else {
                    counter.increment()?;
                }
            }
            Ok(iterations)
        })?;
    }
    report(&coord.join_all()?);

    let expected = workers as u64 * iterations;
    let actual = counter.get();
    println!("expected {expected}, counted {actual}");
    if !unguarded && actual != expected as i64 {
        bail!("guarded counter lost updates");
    }
    if unguarded && actual < expected as i64 {
        println!("{} updates lost without the lock", expected as i64 - actual);
    }
    Ok(())
}

fn semaphore(interrupt: &Canceller, permits: u32, workers: usize, hold_ms: u64) -> Result<()> {
    let sem = Arc::new(Semaphore::new(permits, permits)?);
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut coord = Coordinator::<()>::new("permits").with_canceller(interrupt.clone());
    for _ in 0..workers {
        let (sem, inside, peak) = (Arc::clone(&sem), Arc::clone(&inside), Arc::clone(&peak));
        coord.spawn(Payload::none(), move |ctx, _| {
            let _permit = ctx.acquire(&*sem)?;
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            println!("{}: inside ({now} holding)", ctx.name().unwrap_or("?"));
            let held = ctx.sleep(Duration::from_millis(hold_ms));
            inside.fetch_sub(1, Ordering::SeqCst);
            held
        })?;
    }
    report(&coord.join_all()?);
    println!("peak holders {} of {permits} permits", peak.load(Ordering::SeqCst));
    Ok(())
}

fn lock(interrupt: &Canceller, workers: usize, iterations: u64) -> Result<()> {
    let shared = Arc::new(Guarded::new(0i64));
    let mut coord = Coordinator::<()>::new("lock").with_canceller(interrupt.clone());
    for _ in 0..workers {
        let shared = Arc::clone(&shared);
        coord.spawn(Payload::none(), move |ctx, _| {
            for _ in 0..iterations {
                ctx.with_lock(&*shared, |v| *v += 1)?;
                ctx.sleep(Duration::from_millis(10))?;
            }
            Ok(())
        })?;
    }
    report(&coord.join_all()?);
    println!(
        "value {} (expected {}), lock held: {}",
        shared.read()?,
        workers as u64 * iterations,
        shared.is_locked()
    );
    Ok(())
}

fn cancel(interrupt: &Canceller, run_secs: u64, cancel_after_ms: u64) -> Result<()> {
    let mut coord = Coordinator::<()>::new("cancel").with_canceller(interrupt.clone());
    let id = coord.spawn(Payload::none(), move |ctx, _| {
        println!("worker: started, running for ~{run_secs}s unless cancelled");
        for i in 0..run_secs {
            println!("worker: {i}");
            ctx.sleep(Duration::from_secs(1))?;
        }
        println!("worker: finished normally");
        Ok(())
    })?;
    thread::sleep(Duration::from_millis(cancel_after_ms));
    println!("main: requesting cancellation");
    coord.cancel(id);
    for (_, joined) in coord.join_all()? {
        if joined.outcome.is_cancelled() {
            println!("main: worker was cancelled");
        } else {
            println!("main: worker exited normally");
        }
    }
    Ok(())
}

fn args(values: Vec<i32>) -> Result<()> {
    // Shared: the vector comes back through join.
    let mut sorter = libsync::worker::spawn(Payload::Shares(values), |_, v: &mut Vec<i32>| {
        v.sort_unstable();
        Ok(v.iter().map(|&x| i64::from(x)).sum::<i64>())
    })?;
    let joined = sorter.join()?;
    let sum = joined.outcome.into_value();
    println!("sum {sum:?}, sorted payload {:?}", joined.payload);

    // Consumed: the worker owns and drops its message.
    let mut greeter = Builder::new()
        .name("greeter")
        .stack_size(64 * 1024)
        .spawn(Payload::Consumes(String::from("hello from the coordinator")), |ctx, msg| {
            println!("{}: {msg}", ctx.name().unwrap_or("?"));
            Ok(msg.len())
        })?;
    let joined = greeter.join()?;
    println!(
        "greeter returned {:?}, payload back: {}",
        joined.outcome.into_value(),
        joined.payload.is_some()
    );
    Ok(())
}

fn pipe_demo(fifo: Option<PathBuf>, count: i32) -> Result<()> {
    let values: Vec<i32> = (1..=count).collect();
    let (mut rx, writer, named) = match fifo {
        Some(path) => {
            let fifo = Fifo::create(&path, 0o600)?;
            let f = fifo.clone();
            let writer = thread::spawn(move || -> libsync::Result<()> {
                let mut tx = f.open_writer()?;
                write_values(&mut tx, &values)
            });
            (fifo.open_reader()?, writer, Some(fifo))
        }
        None => {
            let (rx, mut tx) = pipe::pipe()?;
            let writer = thread::spawn(move || write_values(&mut tx, &values));
            (rx, writer, None)
        }
    };
    let got: Vec<i32> = read_values(&mut rx)?;
    match writer.join() {
        Ok(r) => r?,
        Err(_) => bail!("writer thread panicked"),
    }
    println!("received {got:?}");
    if let Some(fifo) = named {
        fifo.remove()?;
    }
    Ok(())
}

fn shm(interrupt: &Canceller, name: &str, workers: usize, iterations: u64) -> Result<()> {
    ShmGuarded::<i64>::clear_storage(name);
    let anchor = ShmGuarded::open(name, 0i64)?;
    let mut coord = Coordinator::<()>::new("shm").with_canceller(interrupt.clone());
    for _ in 0..workers {
        let name = name.to_string();
        coord.spawn(Payload::none(), move |ctx, _| {
            let counter = ShmGuarded::open(&name, 0i64)?;
            for _ in 0..iterations {
                ctx.with_lock(&counter, |v| *v += 1)?;
            }
            Ok(())
        })?;
    }
    report(&coord.join_all()?);
    println!(
        "shared counter {} (expected {})",
        anchor.read()?,
        workers as u64 * iterations
    );
    Ok(())
}
