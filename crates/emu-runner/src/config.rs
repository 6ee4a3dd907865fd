//! Configuration record and the optional JSON config file.
//!
//! The CLI populates an [`EmulatorConfig`] in two passes: an optional
//! config file first, then command-line flags on top, so flags always
//! win.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Fully resolved configuration the wiring layer consumes.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub rom_path: PathBuf,
    /// Fixed at zero; the CPU resets with its PC at the ROM base.
    pub rom_base: u64,
    pub ram_base: u64,
    pub ram_size: u64,
    pub uart_base: u64,
    pub timer_base: u64,
    pub fb_base: u64,
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub cpu_frequency: u64,
    pub debug: bool,
    pub itrace: bool,
    pub mtrace: bool,
    pub bptrace: bool,
    pub headless: bool,
    pub log_level: String,
    /// Base name for log redirection: the log channel goes to
    /// `<base>.err`, the device channel to `<base>.out`.
    pub log_file: Option<PathBuf>,
    pub show_help: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            rom_path: PathBuf::new(),
            rom_base: 0,
            ram_base: 0x8000_0000,
            ram_size: 256 * 1024 * 1024,
            uart_base: 0x2000_0000,
            timer_base: 0x2000_1000,
            fb_base: 0x3000_0000,
            width: 640,
            height: 480,
            title: "Emulator".to_string(),
            cpu_frequency: 1_000_000,
            debug: false,
            itrace: false,
            mtrace: false,
            bptrace: false,
            headless: false,
            log_level: "info".to_string(),
            log_file: None,
            show_help: false,
        }
    }
}

/// On-disk shape of the config file. Every field is optional; absent
/// fields keep their defaults or CLI values.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    rom: Option<PathBuf>,
    ram_base: Option<u64>,
    ram_size: Option<u64>,
    uart_base: Option<u64>,
    timer_base: Option<u64>,
    fb_base: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    title: Option<String>,
    cpu_frequency: Option<u64>,
    debug: Option<bool>,
    itrace: Option<bool>,
    mtrace: Option<bool>,
    bptrace: Option<bool>,
    headless: Option<bool>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

/// Loads and parses a JSON config file. A missing file is an error only
/// when the user named it explicitly.
pub fn load_config_file(path: &Path, required: bool) -> Result<Option<ConfigFile>, String> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            if required {
                return Err(format!("failed to open config file {}: {err}", path.display()));
            }
            return Ok(None);
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|err| format!("invalid config file {}: {err}", path.display()))
}

impl EmulatorConfig {
    /// Folds config-file values into the record.
    pub fn apply_file(&mut self, file: ConfigFile) {
        if let Some(rom) = file.rom {
            self.rom_path = rom;
        }
        if let Some(value) = file.ram_base {
            self.ram_base = value;
        }
        if let Some(value) = file.ram_size {
            self.ram_size = value;
        }
        if let Some(value) = file.uart_base {
            self.uart_base = value;
        }
        if let Some(value) = file.timer_base {
            self.timer_base = value;
        }
        if let Some(value) = file.fb_base {
            self.fb_base = value;
        }
        if let Some(value) = file.width {
            self.width = value;
        }
        if let Some(value) = file.height {
            self.height = value;
        }
        if let Some(value) = file.title {
            self.title = value;
        }
        if let Some(value) = file.cpu_frequency {
            self.cpu_frequency = value;
        }
        if let Some(value) = file.debug {
            self.debug = value;
        }
        if let Some(value) = file.itrace {
            self.itrace = value;
        }
        if let Some(value) = file.mtrace {
            self.mtrace = value;
        }
        if let Some(value) = file.bptrace {
            self.bptrace = value;
        }
        if let Some(value) = file.headless {
            self.headless = value;
        }
        if let Some(value) = file.log_level {
            self.log_level = value;
        }
        if let Some(value) = file.log_file {
            self.log_file = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn file_values_override_defaults_only_where_present() {
        let mut config = EmulatorConfig::default();
        let file: ConfigFile = serde_json::from_str(
            r#"{"rom": "boot.bin", "width": 320, "debug": true}"#,
        )
        .unwrap();
        config.apply_file(file);

        assert_eq!(config.rom_path, PathBuf::from("boot.bin"));
        assert_eq!(config.width, 320);
        assert!(config.debug);
        // Untouched fields keep defaults.
        assert_eq!(config.height, 480);
        assert_eq!(config.ram_base, 0x8000_0000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<ConfigFile, _> = serde_json::from_str(r#"{"rum": "typo.bin"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_fatal_only_when_required() {
        let path = Path::new("/nonexistent/emulator.json");
        assert!(load_config_file(path, false).unwrap().is_none());
        assert!(load_config_file(path, true).is_err());
    }

    #[test]
    fn config_file_round_trips_through_json() {
        let path = std::env::temp_dir().join(format!("emu-config-{}.json", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{"uart_base": 1073741824, "log_level": "debug"}}"#).unwrap();

        let parsed = load_config_file(&path, true).unwrap().unwrap();
        let mut config = EmulatorConfig::default();
        config.apply_file(parsed);
        assert_eq!(config.uart_base, 0x4000_0000);
        assert_eq!(config.log_level, "debug");

        let _ = fs::remove_file(&path);
    }
}
