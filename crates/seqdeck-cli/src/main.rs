//! SeqDeck CLI - The `seqdeck` command.
//!
//! Wires the performance engine to real transports:
//!
//! - **Output**: JACK MIDI port when a JACK server is running, otherwise a
//!   logging bus
//! - **Clock**: optional JACK transport sync
//! - **Input**: ALSA (midir) or JACK MIDI into recording slots
//! - **Control**: OSC over UDP and, optionally, the terminal keyboard

mod demo;
mod keyboard;
mod osc_server;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use seqdeck_core::jack_transport::{self, JackClient};
use seqdeck_core::{Config, DeviceBus, Engine, ExternalClock, KeyBindings, LogBus, MidiInputManager, OscRouter};

use crate::keyboard::KeyboardSurface;
use crate::osc_server::OscServer;

/// SeqDeck - live MIDI pattern performance
#[derive(Parser, Debug)]
#[command(name = "seqdeck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A live MIDI pattern-bank performance engine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine (the default)
    Run(RunArgs),

    /// Write a commented default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,

        /// Where to write it (defaults to the platform config dir)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Print the default config file location
    ConfigPath,

    /// List MIDI input devices
    ListMidi,

    /// Show version information
    Version,
}

#[derive(ClapArgs, Debug, Default)]
struct RunArgs {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// UDP port for OSC control (0 disables)
    #[arg(long, value_name = "PORT")]
    osc_port: Option<u16>,

    /// Follow the JACK transport
    #[arg(long)]
    jack_transport: bool,

    /// ALSA MIDI input device (partial name match)
    #[arg(long, value_name = "NAME")]
    midi_in: Option<String>,

    /// Open a JACK MIDI input port
    #[arg(long)]
    jack_midi_in: bool,

    /// Control the engine from this terminal's keyboard
    #[arg(short, long)]
    keyboard: bool,

    /// Initial tempo
    #[arg(long)]
    bpm: Option<f64>,

    /// Load a demo set into screen set 0
    #[arg(long)]
    demo: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(run_args) => run(run_args),
        Commands::Init { force, path } => init_config(path, force),
        Commands::ConfigPath => {
            println!("{}", Config::config_path()?.display());
            Ok(())
        }
        Commands::ListMidi => {
            let devices = MidiInputManager::list_devices().map_err(anyhow::Error::msg)?;
            if devices.is_empty() {
                println!("No MIDI input devices found");
            }
            for device in devices {
                println!("{:>3}  {}  ({})", device.port_index, device.name, device.backend);
            }
            Ok(())
        }
        Commands::Version => {
            println!("seqdeck {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Part of the SeqDeck project");
            println!("A live MIDI pattern-bank performance engine");
            Ok(())
        }
    }
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => Config::config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("Config file already exists: {} (use --force to overwrite)", path.display());
    }
    Config::create_default_config_file(&path)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config = Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.osc_port {
        config.osc.port = port;
    }
    if let Some(bpm) = args.bpm {
        config.engine.bpm = bpm;
    }
    if args.jack_transport {
        config.jack.transport = true;
    }
    if args.midi_in.is_some() {
        config.midi.input = args.midi_in.clone();
    }
    if args.jack_midi_in {
        config.midi.jack_input = true;
    }
    Ok(config)
}

/// Open the JACK output (and transport follower) or fall back to logging.
fn open_output(config: &Config, clock: &Arc<ExternalClock>) -> (Option<JackClient>, Arc<dyn DeviceBus>) {
    if !jack_transport::is_jack_running() {
        if config.jack.transport {
            log::warn!("[JACK] Server not running; transport sync disabled");
        }
        log::info!("[ENGINE] No JACK server, output goes to the log");
        return (None, Arc::new(LogBus));
    }
    let follow = config.jack.transport.then(|| clock.clone());
    match JackClient::new(&config.jack.client_name, follow) {
        Ok((client, bus)) => (Some(client), Arc::new(bus)),
        Err(e) => {
            log::warn!("[JACK] {}; output goes to the log", e);
            (None, Arc::new(LogBus))
        }
    }
}

fn open_inputs(config: &Config, inputs: &mut MidiInputManager) {
    if let Some(name) = &config.midi.input {
        if let Err(e) = inputs.open_by_name(name) {
            log::warn!("[INPUT] {}", e);
        }
    }
    if config.midi.jack_input {
        let client_name = format!("{}-in", config.jack.client_name);
        if let Err(e) = inputs.open_jack(&client_name) {
            log::warn!("[INPUT] {}", e);
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    init_logger();
    let config = load_config(&args)?;
    let bindings = KeyBindings::from_config(&config.keys).context("Invalid key bindings")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())
        .context("Failed to install SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())
        .context("Failed to install SIGTERM handler")?;

    let clock = Arc::new(ExternalClock::new(config.engine.ppqn.max(1), config.engine.bpm()));
    let (jack, bus) = open_output(&config, &clock);
    let engine = Engine::with_clock(&config.engine, bus, clock);
    let handle = engine.handle().clone();

    if let (Some(client), true) = (&jack, config.jack.transport) {
        handle.enable_external_clock(client.sample_rate());
        handle.set_transport_control(Some(Arc::new(client.transport_control(handle.external_clock()))));
    }

    let mut inputs = MidiInputManager::new(handle.input_sender());
    open_inputs(&config, &mut inputs);

    if args.demo {
        demo::seed(&handle)?;
    }

    let osc_thread = if config.osc.port != 0 {
        let router = OscRouter::new(config.engine.layout());
        let server = OscServer::bind(config.osc.port, router, handle.clone())?;
        Some(server.spawn(shutdown.clone())?)
    } else {
        None
    };

    if args.keyboard {
        KeyboardSurface::new(bindings, handle.clone()).run(&shutdown)?;
        shutdown.store(true, Ordering::Relaxed);
    } else {
        log::info!("seqdeck running (Ctrl+C to exit)");
        while !shutdown.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100));
        }
    }

    log::info!("Shutting down...");
    engine.shutdown();
    if let Some(thread) = osc_thread {
        let _ = thread.join();
    }
    inputs.close_all();
    drop(jack);
    log::info!("Bye");
    Ok(())
}
