//! Taptone - tap-to-tone latency tester
//!
//! Entry point for the command line tester.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taptone::audio::device::{
    CpalSource, InputSource, SyntheticConfig, SyntheticSource, SyntheticTrigger,
};
use taptone::{TapToToneTester, TestResult, TesterConfig};
use tracing::{error, info};

/// Slack on top of the settle delay before a trial is abandoned
const RESULT_SLACK: Duration = Duration::from_secs(2);

/// Pause before the simulated tap, so the window starts with silence
const SIMULATED_LEAD_IN: Duration = Duration::from_millis(300);

struct Options {
    device_name: Option<String>,
    sample_rate: Option<u32>,
    simulate: bool,
    trials: u32,
    config_path: Option<PathBuf>,
    json: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taptone=info".parse()?)
                .add_directive("taptone_core=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        device_name: None,
        sample_rate: None,
        simulate: false,
        trials: 5,
        config_path: None,
        json: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => {
                list_devices();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("taptone {} ({})", taptone::VERSION, taptone::BUILD_DATE);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--simulate" | "-s" => options.simulate = true,
            "--json" => options.json = true,
            "--device" | "-d" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: --device requires a device name");
                    return Ok(());
                };
                options.device_name = Some(value.clone());
                i += 1;
            }
            "--sample-rate" | "-r" => {
                let Some(rate) = args.get(i + 1).and_then(|v| v.parse().ok()) else {
                    eprintln!("Error: --sample-rate requires a numeric value");
                    return Ok(());
                };
                options.sample_rate = Some(rate);
                i += 1;
            }
            "--trials" | "-n" => {
                let Some(count) = args.get(i + 1).and_then(|v| v.parse().ok()) else {
                    eprintln!("Error: --trials requires a numeric value");
                    return Ok(());
                };
                options.trials = count;
                i += 1;
            }
            "--config" | "-c" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: --config requires a path");
                    return Ok(());
                };
                options.config_path = Some(PathBuf::from(value));
                i += 1;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
            _ => {
                // Positional argument - treat as device name if not set
                if options.device_name.is_none() {
                    options.device_name = Some(args[i].clone());
                }
            }
        }
        i += 1;
    }

    run(options)
}

fn print_help() {
    println!("Usage: taptone [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -l, --list              List available input devices");
    println!("  -d, --device NAME       Capture from the named input device");
    println!("  -r, --sample-rate RATE  Capture sample rate (default: 48000)");
    println!("  -s, --simulate          Use the simulated microphone");
    println!("  -n, --trials N          Number of trials (default: 5)");
    println!("  -c, --config PATH       Load tester configuration from JSON");
    println!("      --json              Print the final summary as JSON");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Examples:");
    println!("  taptone --simulate -n 10");
    println!("  taptone -d \"USB Microphone\" -r 44100");
}

fn list_devices() {
    println!("Scanning for input devices...");
    println!();

    match CpalSource::list_devices() {
        Ok(devices) if devices.is_empty() => println!("No input devices found."),
        Ok(devices) => {
            println!("Found {} device(s):", devices.len());
            println!();
            for (i, device) in devices.iter().enumerate() {
                let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                println!("  {}. {}{}", i + 1, device.name, default_marker);
                println!(
                    "     Channels: {} in, default rate {} Hz",
                    device.input_channels, device.default_sample_rate
                );
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("Error: {}", e);
        }
    }
}

/// Where taps come from
enum TapSource {
    Simulated(SyntheticTrigger),
    Keyboard,
}

fn run(options: Options) -> Result<()> {
    let mut config = match &options.config_path {
        Some(path) => TesterConfig::load(path),
        None => TesterConfig::default(),
    };
    if let Some(rate) = options.sample_rate {
        config.sample_rate = rate;
    }

    let (source, taps): (Arc<dyn InputSource>, TapSource) = if options.simulate {
        let synthetic = SyntheticSource::new(SyntheticConfig::default());
        let trigger = synthetic.trigger();
        (Arc::new(synthetic), TapSource::Simulated(trigger))
    } else {
        let cpal = match &options.device_name {
            Some(name) => CpalSource::with_device(name),
            None => CpalSource::new(),
        };
        (Arc::new(cpal), TapSource::Keyboard)
    };

    let settle = Duration::from_millis(config.output_latency_ms as u64);
    let tester = Arc::new(TapToToneTester::new(source, config));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    info!(trials = options.trials, simulate = options.simulate, "Starting tap-to-tone run");
    if !options.json {
        println!("Running {} trial(s). Press Ctrl+C to stop.", options.trials);
        println!("────────────────────────────────────────");
    }

    let stdin = io::stdin();
    for trial in 1..=options.trials {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        tester.start().context("starting capture")?;

        match &taps {
            TapSource::Simulated(trigger) => {
                std::thread::sleep(SIMULATED_LEAD_IN);
                trigger.fire();
            }
            TapSource::Keyboard => {
                print!("Trial {}: press Enter, then tap the device... ", trial);
                io::stdout().flush()?;
                let mut line = String::new();
                stdin.lock().read_line(&mut line)?;
            }
        }

        // The window closes one settle delay from here; keyboard taps follow Enter
        let (tx, rx) = crossbeam_channel::bounded::<Option<TestResult>>(1);
        let weak = Arc::downgrade(&tester);
        tester.schedule_task_when_done(move || {
            let result = weak.upgrade().and_then(|t| t.analyze_captured_audio());
            let _ = tx.send(result);
        })?;
        if matches!(taps, TapSource::Keyboard) {
            println!("tap now (within {} ms)", settle.as_millis());
        }

        match rx.recv_timeout(settle + RESULT_SLACK) {
            Ok(Some(result)) => report_trial(trial, &result, options.json),
            Ok(None) => println!("Trial {}: recording disabled", trial),
            Err(_) => println!("Trial {}: no result", trial),
        }
    }

    tester.stop();

    let summary = tester.stats_summary();
    if options.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("────────────────────────────────────────");
    println!(
        "Trials: {} | Measured: {} | Failed: {}",
        summary.trial_count, summary.measurement_count, summary.failed_trials
    );
    if let (Some(mean), Some(min), Some(max), Some(dev)) = (
        summary.mean_latency_ms,
        summary.min_latency_ms,
        summary.max_latency_ms,
        summary.latency_deviation_ms,
    ) {
        println!(
            "Latency: mean {:.2}ms | min {:.2}ms | max {:.2}ms | deviation {:.2}ms",
            mean, min, max, dev
        );
    }
    Ok(())
}

fn report_trial(trial: u32, result: &TestResult, json: bool) {
    if json {
        return;
    }
    match result.latency() {
        Ok(latency) => println!(
            "Trial {}: latency {:>7.2}ms | tap {:.3} | tone {:.3}",
            trial, latency.latency_ms, latency.tap.amplitude, latency.tone.amplitude
        ),
        Err(e) => println!("Trial {}: {}", trial, e),
    }
}
