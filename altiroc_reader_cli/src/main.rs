use clap::{Arg, ArgAction, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::time::Duration;

use libaltiroc_reader::config::Config;
use libaltiroc_reader::error::ProcessorError;
use libaltiroc_reader::process::{
    analyze_tot_captures, calibrate_capture, convert_capture, dump_capture,
};
use libaltiroc_reader::worker_status::TaskStatus;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could not create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

enum Task {
    Dump,
    Convert,
    Calibrate,
    Analyze,
}

fn run_task(
    task: Task,
    config: Config,
    files: Vec<PathBuf>,
    tx: Sender<TaskStatus>,
) -> Result<String, ProcessorError> {
    match task {
        Task::Dump => {
            let mut records = 0;
            let mut hits = 0;
            for (index, file) in files.iter().enumerate() {
                let summary = dump_capture(file, &tx, index)?;
                records += summary.records;
                hits += summary.pixel_hits + summary.single_word_events;
            }
            Ok(format!("Dumped {records} records ({hits} events)"))
        }
        Task::Convert => {
            let mut written = 0;
            for (index, file) in files.iter().enumerate() {
                written += convert_capture(file, config.tot_mode, &tx, index)?.len();
            }
            Ok(format!("Wrote {written} text files"))
        }
        Task::Calibrate => {
            if files.len() > 1 {
                log::warn!("Calibration uses the first capture only; ignoring the rest");
            }
            let calibration = calibrate_capture(&files[0], &config, &tx)?;
            Ok(format!(
                "Calibration saved; average TOT LSB = {} ps",
                calibration.mean_fine_lsb_ps(config.lsb_totc_ps)
            ))
        }
        Task::Analyze => {
            let summary = analyze_tot_captures(&files, &config, &tx)?;
            Ok(format!(
                "Analyzed {} sweep steps; average stdev = {} ps",
                summary.steps.len(),
                summary.mean_stdev_ps
            ))
        }
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("altiroc_reader_cli")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .help("Path to the YAML config file"),
        )
        .subcommand(Command::new("new").about("Make a template configuration yaml file").arg(
            Arg::new("path").short('p').long("path").required(true).help("Path to the file"),
        ))
        .subcommand(capture_command("dump", "Decode a capture and log every event"))
        .subcommand(capture_command(
            "convert",
            "Export per-hit text files per FPGA channel",
        ))
        .subcommand(capture_command(
            "calibrate",
            "Build and save the TOT fine-interpolator calibration table",
        ))
        .subcommand(capture_command(
            "analyze",
            "Per-step TOT summary for a sweep recorded as one capture per step",
        ))
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Load our config, falling back to the script defaults
    let config = match matches.get_one::<String>("config") {
        Some(path) => {
            let path = PathBuf::from(path);
            log::info!("Loading config from {}...", path.to_string_lossy());
            match Config::read_config_file(&path) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("{e}");
                    return;
                }
            }
        }
        None => {
            log::info!("No config given, using defaults.");
            Config::default()
        }
    };
    log::info!("Pixel: {} TOT mode: {:?}", config.pixel_number, config.tot_mode);
    log::info!(
        "LSB TOTc: {} ps Iterations per step: {}",
        config.lsb_totc_ps,
        config.iterations_per_step
    );
    log::info!(
        "Calibration path: {}",
        config.calibration_path.to_string_lossy()
    );

    let (task, sub_matches) = match matches.subcommand() {
        Some(("new", m)) => {
            let path = PathBuf::from(m.get_one::<String>("path").expect("We require a path"));
            log::info!("Making a template config at {}...", path.to_string_lossy());
            make_template_config(&path);
            log::info!("Done.");
            return;
        }
        Some(("dump", m)) => (Task::Dump, m),
        Some(("convert", m)) => (Task::Convert, m),
        Some(("calibrate", m)) => (Task::Calibrate, m),
        Some(("analyze", m)) => (Task::Analyze, m),
        _ => return,
    };

    let files: Vec<PathBuf> = sub_matches
        .get_many::<String>("file")
        .expect("We require capture files")
        .map(PathBuf::from)
        .collect();
    let n_files = files.len() as u64;

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100 * n_files));
    let (tx, rx) = channel::<TaskStatus>();
    // Spawn the task!
    let handle = std::thread::spawn(move || run_task(task, config, files, tx));

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(status) => {
                pb.set_position(status.file_index as u64 * 100 + (status.progress * 100.0) as u64)
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => (),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(message) => log::info!("{message}"),
            Err(e) => log::error!("Task failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join processing task!"),
    }

    pb.finish();

    log::info!("Done.");
}

fn capture_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name).about(about).arg(
        Arg::new("file")
            .short('f')
            .long("file")
            .required(true)
            .action(ArgAction::Append)
            .help("Capture (.dat) file; repeat for multiple files"),
    )
}
