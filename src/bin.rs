extern crate getopts;

extern crate pulsevollib;

use error_chain::{ensure, ChainedError};
use futures::task::LocalSpawn;
use getopts::Options;
use log::{debug, error, trace};
use pulsevollib::audio::pulseaudio::PulseConnector;
use pulsevollib::audio::{AudioSignal, VolumeController, VolumeHandle};
use pulsevollib::errors::*;
use pulsevollib::prefs::Prefs;
use std::cell::Cell;
use std::env;
use std::rc::Rc;
use std::time::Duration;



/// Give up if no default sink showed up within this time.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);



#[derive(Clone, Copy, Debug, PartialEq)]
enum Action {
    Print,
    SetVolume(f64),
    Up,
    Down,
    Mute(bool),
    ToggleMute,
}


#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    Resolving,
    Acting,
    Sent,
    Done,
}


fn main() {
    let args: Vec<String> = env::args().collect();

    let mut opts = Options::new();
    opts.optflag("h", "help", "Show help");
    opts.optopt("", "set-volume", "Set the volume of the default sink", "PERCENT");
    opts.optflag("", "up", "Increase the volume by the scroll step");
    opts.optflag("", "down", "Decrease the volume by the scroll step");
    opts.optflag("", "mute", "Mute the default sink");
    opts.optflag("", "unmute", "Unmute the default sink");
    opts.optflag("", "toggle-mute", "Toggle mute of the default sink");
    opts.optflag("w", "watch", "Keep running and print every change");
    opts.optopt("c", "config", "Use the given config file", "FILE");
    opts.optopt("",
                "log-to-file",
                "Log files to the specified dir instead of stderr",
                "DIRECTORY");
    opts.optflagopt("l",
                    "log-level",
                    "Set the log level (trace/debug/info/warn/error/off)",
                    "LEVEL");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&opts);
            std::process::exit(2);
        }
    };

    if matches.opt_present("h") {
        print_usage(&opts);
        return;
    }

    let log_dir = matches.opt_str("log-to-file");
    let log_level = matches.opt_default("log-level", "debug")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            "off" => log::LevelFilter::Off,
            _ => log::LevelFilter::Debug,
        })
        .unwrap_or(log::LevelFilter::Warn);

    let mut flogger = flexi_logger::Logger::with(flexi_logger::LogSpecification::builder()
                                                     .default(log_level)
                                                     .build());

    if let Some(dir) = log_dir {
        flogger = flogger.log_to_file(flexi_logger::FileSpec::default().directory(dir));
    }

    let _logger = flogger.start()
        .unwrap_or_else(|e| panic!("Logger initialization failed with {}", e));

    let action = match parse_action(&matches) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}", e);
            print_usage(&opts);
            std::process::exit(2);
        }
    };

    let code = match run(action,
                         matches.opt_present("watch"),
                         matches.opt_str("config")) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e.display_chain());
            eprintln!("Error: {}", e);
            1
        }
    };

    std::process::exit(code);
}


fn parse_action(matches: &getopts::Matches) -> Result<Action> {
    let mut actions = vec![];

    if let Some(p) = matches.opt_str("set-volume") {
        let percent: u32 = p.trim_end_matches('%')
            .parse()
            .chain_err(|| format!("Invalid volume {:?}", p))?;
        ensure!(percent <= 100, "Volume must be between 0 and 100, got {}", percent);
        actions.push(Action::SetVolume(percent as f64 / 100.0));
    }
    if matches.opt_present("up") {
        actions.push(Action::Up);
    }
    if matches.opt_present("down") {
        actions.push(Action::Down);
    }
    if matches.opt_present("mute") {
        actions.push(Action::Mute(true));
    }
    if matches.opt_present("unmute") {
        actions.push(Action::Mute(false));
    }
    if matches.opt_present("toggle-mute") {
        actions.push(Action::ToggleMute);
    }

    ensure!(actions.len() <= 1, "Only one action may be given at a time");

    return Ok(actions.pop().unwrap_or(Action::Print));
}


fn run(action: Action, watch: bool, config: Option<String>) -> Result<i32> {
    let prefs = match config {
        Some(path) => Prefs::from_file(path)?,
        None => Prefs::new()?,
    };
    trace!("Loaded prefs:\n{}", prefs);

    let context = glib::MainContext::default();
    let _guard = context.acquire()?;
    let main_loop = glib::MainLoop::new(Some(&context), false);

    let connector = PulseConnector::new()?;
    let spawner: Rc<dyn LocalSpawn> = Rc::new(context.clone());
    let controller = VolumeController::new(Box::new(connector), spawner, &prefs)?;

    let phase = Rc::new(Cell::new(Phase::Resolving));
    let code = Rc::new(Cell::new(0));

    {
        let handle = controller.downgrade();
        let main_loop = main_loop.clone();
        let phase = phase.clone();
        let code = code.clone();
        controller.connect_handler(Box::new(move |signal| {
            on_signal(signal, &handle, action, watch, &phase, &code, &main_loop);
        }));
    }

    if !watch {
        let main_loop = main_loop.clone();
        let phase = phase.clone();
        let code = code.clone();
        glib::timeout_add_local_once(RESOLVE_TIMEOUT, move || {
            if phase.get() != Phase::Done {
                eprintln!("Timed out waiting for the sound server");
                code.set(1);
                main_loop.quit();
            }
        });
    }

    main_loop.run();
    drop(controller);

    return Ok(code.get());
}


fn on_signal(signal: AudioSignal,
             handle: &VolumeHandle,
             action: Action,
             watch: bool,
             phase: &Cell<Phase>,
             code: &Cell<i32>,
             main_loop: &glib::MainLoop) {
    let controller = match handle.upgrade() {
        Some(c) => c,
        None => return,
    };

    match (signal, phase.get()) {
        (AudioSignal::SinkChanged, Phase::Resolving) => {
            phase.set(Phase::Acting);
            if let Err(e) = perform(&controller, action) {
                eprintln!("Error: {}", e);
                code.set(1);
                finish(phase, main_loop);
                return;
            }
            // nothing to send
            if phase.get() == Phase::Acting {
                print_state(&controller);
                if !watch {
                    finish(phase, main_loop);
                } else {
                    phase.set(Phase::Done);
                }
            }
        }
        (AudioSignal::ValuesChanged, Phase::Acting) => phase.set(Phase::Sent),
        (AudioSignal::ValuesChanged, Phase::Sent) => {
            print_state(&controller);
            if !watch {
                finish(phase, main_loop);
            } else {
                phase.set(Phase::Done);
            }
        }
        (AudioSignal::ValuesChanged, Phase::Done) |
        (AudioSignal::SinkChanged, Phase::Done) => {
            if watch {
                print_state(&controller);
            }
        }
        (AudioSignal::Disconnected, _) => {
            if watch {
                println!("disconnected");
            } else {
                eprintln!("Lost connection to the sound server");
                code.set(1);
                finish(phase, main_loop);
            }
        }
        (AudioSignal::Connected, _) => debug!("Connected"),
        _ => (),
    }
}


fn perform(controller: &VolumeController, action: Action) -> Result<()> {
    return match action {
        Action::Print => Ok(()),
        Action::SetVolume(vol) => controller.set_volume(vol),
        Action::Up => controller.increase_volume(),
        Action::Down => controller.decrease_volume(),
        Action::Mute(mute) => controller.set_mute(mute),
        Action::ToggleMute => controller.toggle_mute(),
    };
}


fn finish(phase: &Cell<Phase>, main_loop: &glib::MainLoop) {
    phase.set(Phase::Done);
    main_loop.quit();
}


fn print_state(controller: &VolumeController) {
    let sink = controller.sink_name().unwrap_or_else(|| String::from("(none)"));
    let muted = if controller.muted() { " [muted]" } else { "" };
    println!("{}: {:.0}%{}", sink, controller.volume() * 100.0, muted);
}


fn print_usage(opts: &Options) {
    let brief = format!("Usage: pulsevol-rs [options]");
    print!("{}", opts.usage(&brief));
}
