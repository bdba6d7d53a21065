use std::env;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use walletfind::{scan, ProgressInfo};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

fn usage(exe: &str) {
    eprintln!("usage: {exe} [-s <start-offset>] <path>");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args();
    let exe = args.next().unwrap_or_else(|| "walletfind".into());
    let mut start_offset: u64 = 0;
    let mut path: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        if arg == "-s" {
            let Some(value) = args.next() else {
                eprintln!("-s needs a byte offset");
                usage(&exe);
                process::exit(2);
            };
            start_offset = match value.parse() {
                Ok(offset) => offset,
                Err(_) => {
                    eprintln!("bad start offset: {value}");
                    usage(&exe);
                    process::exit(2);
                }
            };
            continue;
        }
        if arg == "--help" || arg == "-h" {
            usage(&exe);
            process::exit(0);
        }
        if arg.starts_with('-') && arg.len() > 1 {
            eprintln!("unknown flag: {arg}");
            usage(&exe);
            process::exit(2);
        }
        if path.is_some() {
            usage(&exe);
            process::exit(2);
        }
        path = Some(PathBuf::from(arg));
    }

    let Some(path) = path else {
        usage(&exe);
        process::exit(2);
    };

    let start = Instant::now();
    let mut progress = ProgressPrinter::default();
    let result = scan(
        start_offset,
        &path,
        |detection| {
            println!("Found possible wallet trace:\n  {}", detection.description);
        },
        |info| progress.report(&info),
    );

    match result {
        Ok(stats) => {
            eprintln!(
                "targets={} blocks={} bytes={} detections={} elapsed_ms={}",
                stats.targets,
                stats.blocks,
                stats.bytes_scanned,
                stats.detections,
                start.elapsed().as_millis()
            );
        }
        Err(err) => {
            eprintln!("scan failed: {err}");
            process::exit(1);
        }
    }
}

/// Rate-limited progress display.
///
/// The engine reports once per block; printing that would drown a terminal,
/// so output is held to one line per interval.
#[derive(Default)]
struct ProgressPrinter {
    last_report: Option<Instant>,
}

impl ProgressPrinter {
    fn report(&mut self, info: &ProgressInfo) {
        let now = Instant::now();
        if self
            .last_report
            .is_some_and(|last| now.duration_since(last) < PROGRESS_INTERVAL)
        {
            return;
        }
        self.last_report = Some(now);

        let additional = if info.unscanned_targets > 0 {
            format!(" ({} additional targets)", info.unscanned_targets)
        } else {
            String::new()
        };

        if info.total_bytes <= 0 {
            println!(
                "[{}mb/??mb]{}",
                info.scanned_bytes / (1024 * 1024),
                additional
            );
        } else {
            println!(
                "[{:.2}%]{}",
                (info.scanned_bytes as f64 / info.total_bytes as f64) * 100.0,
                additional
            );
        }
    }
}
