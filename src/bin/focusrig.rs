use anyhow::{anyhow, bail, Context};
use focusrig::autofocus::{AutoFocusConfig, AutoFocusController, AutoFocusEvent};
use focusrig::config::RigConfig;
use focusrig::hardware::FrameSource;
use focusrig::messages::MessageSink;
use focusrig::processor::FrameOrchestrator;
use focusrig::segment::ImageSegmenter;
use focusrig::testing::{SimulatedFocusCamera, SimulatedThermalPlant, SimulatedVoiceCoil};
use focusrig::thermal::{HeaterRegulator, TemperatureController};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const USAGE: &str = "Usage: focusrig <segment|autofocus|heater|print-config> [args] [--config <path>] [--json]";

fn main() -> anyhow::Result<()> {
    focusrig::init_logging();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "segment" => cmd_segment(&args),
        "autofocus" => cmd_autofocus(&args),
        "heater" => cmd_heater(&args),
        "print-config" => cmd_print_config(&args),
        "--version" => {
            println!("{} {}\n{}", focusrig::NAME, focusrig::VERSION, focusrig::DESCRIPTION);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}\n{USAGE}", command);
            std::process::exit(1);
        }
    }
}

fn flag<T: FromStr>(args: &[String], name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match args.iter().position(|a| a == name) {
        None => Ok(None),
        Some(i) => {
            let raw = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("{name} needs a value"))?;
            raw.parse()
                .map(Some)
                .map_err(|e| anyhow!("invalid value {raw:?} for {name}: {e}"))
        }
    }
}

fn json(args: &[String]) -> bool {
    args.iter().any(|a| a == "--json")
}

fn load_config(args: &[String]) -> anyhow::Result<RigConfig> {
    let path = flag::<String>(args, "--config")?
        .map(PathBuf::from)
        .unwrap_or_else(RigConfig::default_path);
    RigConfig::load_layered(Some(path)).context("loading configuration")
}

fn cmd_segment(args: &[String]) -> anyhow::Result<()> {
    // segment <image> [--fraction <f>] [--trim <n>] [--json]
    let path = args
        .get(2)
        .filter(|a| !a.starts_with("--"))
        .ok_or_else(|| anyhow!("Usage: focusrig segment <image> [--fraction f] [--trim n]"))?;
    let config = load_config(args)?;
    let fraction = flag(args, "--fraction")?.unwrap_or(config.segmenter.size_fraction);
    let trim = flag(args, "--trim")?.unwrap_or(config.segmenter.edge_trim);

    let image = image::open(path)
        .with_context(|| format!("opening {path}"))?
        .to_luma8();
    let segmentation = ImageSegmenter::new(fraction, trim)?.segment(&image)?;

    if json(args) {
        println!("{}", serde_json::to_string_pretty(&segmentation)?);
    } else {
        println!(
            "{}x{} grid, {} cells, {} px covered, quality {:.2}",
            segmentation.x_segments.len(),
            segmentation.y_segments.len(),
            segmentation.cell_count(),
            segmentation.total_area,
            segmentation.quality.value
        );
        for (row, cells) in segmentation.cells.iter().enumerate() {
            let spans: Vec<String> = cells.iter().map(ToString::to_string).collect();
            println!("row {row}: {}", spans.join(" "));
        }
    }
    Ok(())
}

fn cmd_autofocus(args: &[String]) -> anyhow::Result<()> {
    // autofocus [--focus <position>] [--start <position>] [--json]
    let config = load_config(args)?;
    let focus: f64 = flag(args, "--focus")?.unwrap_or(3.0);
    let start: f64 = flag(args, "--start")?.unwrap_or(0.0);

    let (messages, status) = MessageSink::channel(256);
    let coil = SimulatedVoiceCoil::new();
    let mut camera = SimulatedFocusCamera::new(coil.clone(), focus, 320, 240);

    let orchestrator = FrameOrchestrator::from_config(&config, messages.clone())?;
    let mut autofocus = AutoFocusController::spawn(
        AutoFocusConfig::from_settings(&config.autofocus)?,
        coil.clone(),
        orchestrator.subscribe_quality()?,
        messages,
    )?;
    let events = autofocus.events();
    orchestrator.attach(&mut camera)?;
    autofocus.start(start)?;

    let result = loop {
        let event = events
            .recv_timeout(Duration::from_secs(120))
            .context("autofocus produced no event")?;
        if json(args) {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{event:?}");
        }
        match event {
            AutoFocusEvent::Focused { position } => break Ok(position),
            AutoFocusEvent::Aborted { error, .. } => break Err(error),
            AutoFocusEvent::Stopped { .. } => bail!("autofocus stopped"),
            _ => {}
        }
    };

    camera.stop();
    autofocus.shutdown();
    orchestrator.shutdown();
    for message in status.try_iter().filter(|m| m.source == "processor") {
        log::debug!("{message}");
    }

    let position = result?;
    if !json(args) {
        println!(
            "focused at {position:.2} (true focus {focus:.2}, {} actuator commands)",
            coil.commands().len()
        );
    }
    Ok(())
}

fn cmd_heater(args: &[String]) -> anyhow::Result<()> {
    // heater [--setpoint <celsius>] [--ticks <n>] [--json]
    let config = load_config(args)?;
    let setpoint = flag(args, "--setpoint")?.or(config.heater.setpoint).unwrap_or(37.0);
    let ticks: usize = flag(args, "--ticks")?.unwrap_or(50);

    let mut settings = config.heater.clone();
    settings.sample_interval_ms = settings.sample_interval_ms.min(100);
    let controller = TemperatureController::from_settings(&settings)?;
    let plant = SimulatedThermalPlant::new(21.0, 1.5, 0.05);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let regulator = HeaterRegulator::spawn(
            controller,
            plant.sensor(),
            plant.heater(),
            MessageSink::log_only(),
        );
        regulator.set_setpoint(Some(setpoint)).await?;

        let mut readings = regulator.readings();
        for _ in 0..ticks {
            readings.changed().await?;
            let reading = *readings.borrow_and_update();
            if let Some(reading) = reading {
                if json(args) {
                    println!("{}", serde_json::to_string(&reading)?);
                } else {
                    println!(
                        "T={:6.2} C duty={}",
                        reading.temperature,
                        reading
                            .duty
                            .map_or_else(|| "off".to_string(), |d| format!("{d:5.1} %"))
                    );
                }
            }
        }
        regulator.stop().await?;
        Ok::<_, anyhow::Error>(())
    })?;
    Ok(())
}

fn cmd_print_config(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    if json(args) {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
