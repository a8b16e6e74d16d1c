#![allow(missing_docs)]

use crate::audio::session::SessionState;
use futures::task::SpawnError;
use libpulse_binding::error::PAErr;



error_chain! {
    foreign_links {
        IO(std::io::Error);
        TomlDe(toml::de::Error);
        TomlSer(toml::ser::Error);
        Xdg(xdg::BaseDirectoriesError);
        Pulse(PAErr);
        Glib(glib::BoolError);
        Spawn(SpawnError);
    }

    errors {
        NotReady(state: SessionState) {
            description("audio session is not ready")
            display("Audio session is not ready (state: {:?})", state)
        }
        InvalidVolume(vol: f64) {
            description("invalid volume")
            display("Invalid volume {}", vol)
        }
    }
}




#[macro_export]
macro_rules! try_w {
    ($expr:expr) => {
        try_wr!($expr, ())
    };
    ($expr:expr, $fmt:expr, $($arg:tt)+) => {
        try_wr!($expr, (), $fmt, $($arg)+)
    };
    ($expr:expr, $fmt:expr) => {
        try_wr!($expr, (), $fmt)
    }
}


#[macro_export]
macro_rules! try_wr {
    ($expr:expr, $ret:expr) => (match $expr {
        ::std::result::Result::Ok(val) => val,
        ::std::result::Result::Err(err) => {
            warn!("{}", err);
            return $ret;
        },
    });
    ($expr:expr, $ret:expr, $fmt:expr) => (match $expr {
        ::std::result::Result::Ok(val) => val,
        ::std::result::Result::Err(err) => {
            warn!("Original error: {}", err);
            warn!($fmt);
            return $ret;
        },
    });
    ($expr:expr, $ret:expr, $fmt:expr, $($arg:tt)+) => (match $expr {
        ::std::result::Result::Ok(val) => val,
        ::std::result::Result::Err(err) => {
            warn!("Original error: {}", err);
            warn!($fmt, $($arg)+);
            return $ret;
        },
    })
}
