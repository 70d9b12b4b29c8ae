
#[cfg(test)]
macro_rules! assert_approx {
    ($real:expr, $expected:expr, $delta:expr) => {
	if $real < $expected - $delta || $real > $expected + $delta {
	    panic!( "Violate {:.6} == {:.6} (+-{:.6})", $real, $expected, $delta );
	}
    }
}

pub mod data;
pub mod error;
pub mod evaluation;
pub mod io;
pub mod model;
pub mod trainer;

pub use data::{Item, SessionId, Timestamp, Count, ClickEvent, BuyEvent, Session, SessionStore};
pub use error::{Error, Result};
pub use evaluation::Evaluation;
pub use model::{Model, Cover, Label};
pub use trainer::{Trainer, Predictor, Observer, LogObserver, SilentObserver};

/// Objects that can be recorded in the log
pub trait Loggable {
    fn log( &self, message: &str, level: tracing::Level );
}

/// Emits the text at a level chosen at run time
pub fn log_at( level: tracing::Level, text: &str ) {
    use tracing::{Level, error, warn, info, debug, trace};
    match level {
	Level::ERROR => error!( "{text}" ),
	Level::WARN => warn!( "{text}" ),
	Level::INFO => info!( "{text}" ),
	Level::DEBUG => debug!( "{text}" ),
	_ => trace!( "{text}" ),
    }
}
