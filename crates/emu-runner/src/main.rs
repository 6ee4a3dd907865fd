//! Emulator binary.
//!
//! Loads a ROM and a machine description from the command line plus an
//! optional JSON config file, wires the bus and devices, and runs the
//! controller with a minifb window or headless.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;

use cpu_toy::ToyCpu;
use emu_core::{CpuErrorKind, CpuExecutor};
use emu_debugger::{CpuState, DebugStatus, PresentBackend};
use emu_logger::log_print;

use emu_runner::backend::{HeadlessBackend, MinifbBackend};
use emu_runner::config::{load_config_file, EmulatorConfig};
use emu_runner::wiring::wire;

const DEFAULT_CONFIG_PATH: &str = "emulator.json";

fn print_usage(program: &str) {
    println!(
        "Usage: {program} --rom <path> [options]\n\
         \n\
         Options:\n\
         \x20 --config <file>       Load config file (default: {DEFAULT_CONFIG_PATH})\n\
         \x20 --debug               Start in debugger mode\n\
         \x20 --headless            Run without a window\n\
         \x20 --width <pixels>      Display width (default: 640)\n\
         \x20 --height <pixels>     Display height (default: 480)\n\
         \x20 --fb-base <addr>      Framebuffer base address (default: 0x30000000)\n\
         \x20 --ram-base <addr>     RAM base address (default: 0x80000000)\n\
         \x20 --ram-size <bytes>    RAM size (default: 268435456)\n\
         \x20 --uart-base <addr>    UART base address (default: 0x20000000)\n\
         \x20 --timer-base <addr>   Timer base address (default: 0x20001000)\n\
         \x20 --cpu-freq <hz>       CPU frequency (default: 1000000)\n\
         \x20 --title <string>      Window title\n\
         \x20 --itrace              Enable instruction trace\n\
         \x20 --mtrace              Enable memory trace\n\
         \x20 --bptrace             Enable branch prediction trace\n\
         \x20 --log-level <lvl>     trace, debug, info, warn or error\n\
         \x20 --log-file <base>     Log to <base>.err, device output to <base>.out\n\
         \x20 --help, -h            Show this help"
    );
}

fn parse_u64(name: &str, text: &str) -> Result<u64, String> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| format!("invalid {name} value: {text}"))
}

fn parse_u32(name: &str, text: &str) -> Result<u32, String> {
    let value = parse_u64(name, text)?;
    u32::try_from(value).map_err(|_| format!("invalid {name} value: {text}"))
}

/// First pass: only `--config` and `--help` matter, so the file can be
/// loaded before the remaining flags override it.
fn find_config_path(args: &[String], config: &mut EmulatorConfig) -> Result<Option<PathBuf>, String> {
    let mut path = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => config.show_help = true,
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--config requires a value".to_string())?;
                path = Some(PathBuf::from(value));
            }
            _ => {}
        }
    }
    Ok(path)
}

/// Second pass: applies every flag over the config-file values.
fn parse_args(args: &[String], config: &mut EmulatorConfig) -> Result<(), String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value_for = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--help" | "-h" => config.show_help = true,
            "--config" => {
                value_for("--config")?;
            }
            "--rom" => config.rom_path = PathBuf::from(value_for("--rom")?),
            "--debug" => config.debug = true,
            "--headless" => config.headless = true,
            "--width" => config.width = parse_u32("width", &value_for("--width")?)?,
            "--height" => config.height = parse_u32("height", &value_for("--height")?)?,
            "--fb-base" => config.fb_base = parse_u64("fb-base", &value_for("--fb-base")?)?,
            "--ram-base" => config.ram_base = parse_u64("ram-base", &value_for("--ram-base")?)?,
            "--ram-size" => config.ram_size = parse_u64("ram-size", &value_for("--ram-size")?)?,
            "--uart-base" => {
                config.uart_base = parse_u64("uart-base", &value_for("--uart-base")?)?;
            }
            "--timer-base" => {
                config.timer_base = parse_u64("timer-base", &value_for("--timer-base")?)?;
            }
            "--cpu-freq" => {
                config.cpu_frequency = parse_u64("cpu-freq", &value_for("--cpu-freq")?)?;
            }
            "--title" => config.title = value_for("--title")?,
            "--itrace" => config.itrace = true,
            "--mtrace" => config.mtrace = true,
            "--bptrace" => config.bptrace = true,
            "--log-level" => config.log_level = value_for("--log-level")?,
            "--log-file" => config.log_file = Some(PathBuf::from(value_for("--log-file")?)),
            other if other.starts_with('-') => {
                return Err(format!("unknown option: {other}"));
            }
            positional => {
                if config.rom_path.as_os_str().is_empty() {
                    config.rom_path = PathBuf::from(positional);
                } else {
                    return Err(format!("unexpected argument: {positional}"));
                }
            }
        }
    }
    Ok(())
}

fn resolve_config(args: &[String]) -> Result<EmulatorConfig, String> {
    let mut config = EmulatorConfig::default();

    let explicit = find_config_path(args, &mut config)?;
    let (path, required) = match &explicit {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    if let Some(file) = load_config_file(&path, required)? {
        config.apply_file(file);
    }

    parse_args(args, &mut config)?;
    Ok(config)
}

fn init_logging(config: &EmulatorConfig) -> Result<(), String> {
    let level = emu_logger::LogLevel::parse(&config.log_level)
        .ok_or_else(|| format!("invalid log level: {}", config.log_level))?;
    emu_logger::set_level(level);
    if let Some(base) = &config.log_file {
        let mut log_path = base.clone().into_os_string();
        log_path.push(".err");
        let mut device_path = base.clone().into_os_string();
        device_path.push(".out");
        emu_logger::set_log_file(Path::new(&log_path));
        emu_logger::set_device_file(Path::new(&device_path));
    }
    Ok(())
}

/// Status handler for the interactive console: one line per state
/// transition, silence during the periodic refreshes.
fn transition_printer() -> Box<dyn Fn(&DebugStatus) + Send + Sync> {
    let previous = Mutex::new(None::<CpuState>);
    Box::new(move |status| {
        let mut previous = previous.lock().unwrap();
        if *previous != Some(status.state) {
            *previous = Some(status.state);
            log_print!("{status}\n");
        }
    })
}

fn run() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "emu-runner".to_string());

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };
    if config.show_help {
        print_usage(&program);
        return 0;
    }
    if let Err(err) = init_logging(&config) {
        eprintln!("error: {err}");
        return 1;
    }

    let mut machine = match wire(&config, || Box::new(ToyCpu::new()) as Box<dyn CpuExecutor>) {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };

    let backend: Box<dyn PresentBackend> = if config.headless {
        Box::new(HeadlessBackend)
    } else {
        match MinifbBackend::new(&config.title, config.width, config.height) {
            Ok(backend) => Box::new(backend),
            Err(err) => {
                eprintln!("error: failed to open window: {err}");
                return 1;
            }
        }
    };

    if config.debug {
        machine.debugger.set_status_handler(Some(transition_printer()));
    }

    machine.debugger.start(Some(backend));
    if config.debug {
        machine.debugger.run_console();
    } else {
        machine.debugger.run_headless_pump();
    }
    machine.debugger.shutdown();

    let error = machine.debugger.last_cpu_error();
    match error.kind {
        CpuErrorKind::None | CpuErrorKind::Halt => 0,
        _ => 1,
    }
}

fn main() {
    process::exit(run());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn flags_override_defaults() {
        let mut config = EmulatorConfig::default();
        parse_args(
            &args(&[
                "--rom",
                "boot.bin",
                "--debug",
                "--width",
                "320",
                "--ram-base",
                "0x40000000",
            ]),
            &mut config,
        )
        .unwrap();
        assert_eq!(config.rom_path, PathBuf::from("boot.bin"));
        assert!(config.debug);
        assert_eq!(config.width, 320);
        assert_eq!(config.ram_base, 0x4000_0000);
    }

    #[test]
    fn positional_argument_is_the_rom() {
        let mut config = EmulatorConfig::default();
        parse_args(&args(&["boot.bin"]), &mut config).unwrap();
        assert_eq!(config.rom_path, PathBuf::from("boot.bin"));

        let err = parse_args(&args(&["extra.bin"]), &mut config).unwrap_err();
        assert!(err.contains("unexpected argument"));
    }

    #[test]
    fn unknown_options_and_missing_values_error() {
        let mut config = EmulatorConfig::default();
        assert!(parse_args(&args(&["--bogus"]), &mut config).is_err());
        assert!(parse_args(&args(&["--width"]), &mut config).is_err());
        assert!(parse_args(&args(&["--width", "lots"]), &mut config).is_err());
    }

    #[test]
    fn hex_and_decimal_values_parse() {
        assert_eq!(parse_u64("x", "0x1000").unwrap(), 0x1000);
        assert_eq!(parse_u64("x", "4096").unwrap(), 4096);
        assert!(parse_u64("x", "0xzz").is_err());
    }
}
