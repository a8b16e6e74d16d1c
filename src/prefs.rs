#![allow(missing_docs)]

//! The preferences subsystem.
//!
//! These are the global application preferences, which can be set
//! by the user. They are read from a file in TOML format and written
//! back with defaults if the file doesn't exist yet.


use crate::errors::*;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use std::time::Duration;



const CONFIG_FILE: &str = "pulsevol.toml";
const XDG_PREFIX: &str = "pulsevol-rs";



#[derive(Deserialize, Debug, Serialize, Clone, PartialEq)]
#[serde(default)]
/// How we announce ourselves to the sound server.
pub struct IdentityPrefs {
    pub app_name: String,
    pub app_version: String,
    pub app_id: String,
    pub icon_name: String,
}

impl Default for IdentityPrefs {
    fn default() -> IdentityPrefs {
        return IdentityPrefs {
            app_name: String::from(env!("CARGO_PKG_NAME")),
            app_version: String::from(env!("CARGO_PKG_VERSION")),
            app_id: String::from("org.pulsevol.volume"),
            icon_name: String::from("multimedia-volume-control"),
        };
    }
}


#[derive(Deserialize, Debug, Serialize, Clone, PartialEq)]
#[serde(default)]
/// Connection preferences.
pub struct ConnectionPrefs {
    /// Server string, `None` for the default server.
    pub server: Option<String>,
    /// Whether to reconnect after the server went away.
    pub reconnect: bool,
    /// Delay before the first reconnect attempt. Doubled on every
    /// further attempt.
    pub reconnect_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Give up after this many attempts in a row, 0 never gives up.
    pub reconnect_max_attempts: u32,
}

impl Default for ConnectionPrefs {
    fn default() -> ConnectionPrefs {
        return ConnectionPrefs {
            server: None,
            reconnect: true,
            reconnect_delay_ms: 500,
            reconnect_max_delay_ms: 30000,
            reconnect_max_attempts: 0,
        };
    }
}

impl ConnectionPrefs {
    /// Delay before the reconnect attempt number `attempt`, counting
    /// from 1.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let delay = self.reconnect_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.reconnect_max_delay_ms);
        return Duration::from_millis(delay);
    }
}


#[derive(Deserialize, Debug, Serialize, Clone, PartialEq)]
#[serde(default)]
/// Behavior preferences.
pub struct BehaviorPrefs {
    /// Volume step in percent for scrolling and hotkeys.
    pub vol_scroll_step: u32,
}

impl Default for BehaviorPrefs {
    fn default() -> BehaviorPrefs {
        return BehaviorPrefs { vol_scroll_step: 6 };
    }
}


#[derive(Deserialize, Debug, Serialize, Default, Clone, PartialEq)]
#[serde(default)]
/// Main preferences struct, holding all sub-preferences.
pub struct Prefs {
    pub identity_prefs: IdentityPrefs,
    pub connection_prefs: ConnectionPrefs,
    pub behavior_prefs: BehaviorPrefs,
}

impl Prefs {
    /// Load the preferences from the XDG config directory, creating
    /// the file with defaults if there is none.
    pub fn new() -> Result<Prefs> {
        let m_config_file = get_xdg_dirs()?.find_config_file(CONFIG_FILE);
        match m_config_file {
            Some(c) => {
                debug!("Config file present at {:?}, using it.", c);
                return Prefs::from_file(c);
            }
            None => {
                debug!("No config file present, creating one with defaults.");

                let prefs = Prefs::default();
                prefs.store_config()?;

                return Ok(prefs);
            }
        }
    }


    /// Load the preferences from the given file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Prefs> {
        let path = path.as_ref();
        let mut f = File::open(path)
            .chain_err(|| format!("Could not open config file {:?}", path))?;
        let mut buffer = String::new();
        f.read_to_string(&mut buffer)?;

        let prefs: Prefs = toml::from_str(&buffer)?;
        prefs.validate()
            .chain_err(|| format!("Invalid config file {:?}", path))?;

        return Ok(prefs);
    }


    /// Store the current preferences to the config file.
    pub fn store_config(&self) -> Result<()> {
        let xdg_dirs = get_xdg_dirs()?;
        let config_path = xdg_dirs.place_config_file(CONFIG_FILE)
            .chain_err(|| {
                format!("Could not create config directory at {:?}",
                        xdg_dirs.get_config_home())
            })?;

        debug!("Storing config in {:?}", config_path);
        return self.store_config_to(&config_path);
    }


    /// Store the current preferences to the given file.
    pub fn store_config_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut f = File::create(path).chain_err(|| {
            format!("Could not open/create config file {:?} for writing",
                    path)
        })?;
        f.write_all(self.to_str()?.as_bytes()).chain_err(|| {
            format!("Could not write to config file {:?}", path)
        })?;

        return Ok(());
    }


    /// Check that all values are in their valid ranges.
    pub fn validate(&self) -> Result<()> {
        let step = self.behavior_prefs.vol_scroll_step;
        ensure!(step >= 1 && step <= 50,
                "Volume scroll step must be between 1 and 50, got {}",
                step);

        let conn = &self.connection_prefs;
        ensure!(conn.reconnect_delay_ms > 0,
                "Reconnect delay must be positive");
        ensure!(conn.reconnect_delay_ms <= conn.reconnect_max_delay_ms,
                "Reconnect delay {}ms exceeds maximum delay {}ms",
                conn.reconnect_delay_ms,
                conn.reconnect_max_delay_ms);

        ensure!(!self.identity_prefs.app_name.is_empty(),
                "Application name must not be empty");

        return Ok(());
    }


    /// Convert the current preferences to a viewable String.
    pub fn to_str(&self) -> Result<String> {
        return Ok(toml::to_string(self)?);
    }
}

impl Display for Prefs {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let s = self.to_str().map_err(|_| std::fmt::Error)?;
        return write!(f, "{}", s);
    }
}


/// Get the set of XDG directories, relative to our project.
fn get_xdg_dirs() -> Result<xdg::BaseDirectories> {
    return Ok(xdg::BaseDirectories::with_prefix(XDG_PREFIX)?);
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_valid() {
        let prefs = Prefs::default();
        assert!(prefs.validate().is_ok());
        assert_eq!(prefs.behavior_prefs.vol_scroll_step, 6);
        assert!(prefs.connection_prefs.reconnect);
        assert_eq!(prefs.connection_prefs.server, None);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let prefs: Prefs = toml::from_str(r#"
            [behavior_prefs]
            vol_scroll_step = 10

            [connection_prefs]
            server = "unix:/run/user/1000/pulse/native"
        "#).unwrap();

        assert_eq!(prefs.behavior_prefs.vol_scroll_step, 10);
        assert_eq!(prefs.connection_prefs.server.as_deref(),
                   Some("unix:/run/user/1000/pulse/native"));
        assert_eq!(prefs.connection_prefs.reconnect_delay_ms, 500);
        assert_eq!(prefs.identity_prefs, IdentityPrefs::default());
    }

    #[test]
    fn out_of_range_step_is_rejected() {
        let mut prefs = Prefs::default();
        prefs.behavior_prefs.vol_scroll_step = 0;
        assert!(prefs.validate().is_err());
        prefs.behavior_prefs.vol_scroll_step = 51;
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn delay_above_maximum_is_rejected() {
        let mut prefs = Prefs::default();
        prefs.connection_prefs.reconnect_delay_ms = 60000;
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn reconnect_delay_doubles_up_to_maximum() {
        let conn = ConnectionPrefs {
            reconnect_delay_ms: 500,
            reconnect_max_delay_ms: 3000,
            ..ConnectionPrefs::default()
        };

        assert_eq!(conn.reconnect_delay(1), Duration::from_millis(500));
        assert_eq!(conn.reconnect_delay(2), Duration::from_millis(1000));
        assert_eq!(conn.reconnect_delay(3), Duration::from_millis(2000));
        assert_eq!(conn.reconnect_delay(4), Duration::from_millis(3000));
        assert_eq!(conn.reconnect_delay(100), Duration::from_millis(3000));
    }

    #[test]
    fn stored_prefs_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut prefs = Prefs::default();
        prefs.behavior_prefs.vol_scroll_step = 3;
        prefs.connection_prefs.reconnect = false;
        prefs.store_config_to(&path).unwrap();

        assert_eq!(Prefs::from_file(&path).unwrap(), prefs);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        fs::write(&path, "[behavior_prefs]\nvol_scroll_step = 99\n").unwrap();
        assert!(Prefs::from_file(&path).is_err());

        fs::write(&path, "this is not toml").unwrap();
        assert!(Prefs::from_file(&path).is_err());

        assert!(Prefs::from_file(dir.path().join("missing.toml")).is_err());
    }
}
