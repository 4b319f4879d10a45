//! A discrete-event simulator for BLE piconets in the 2.4 GHz ISM band, with an
//! adaptive-frequency-hopping channel-classification subsystem.
//!
//! The simulator exists to compare channel-quality estimators under reproducible
//! interference scenarios. Two tightly coupled subsystems form the core:
//!
//! * the **Link-Layer connection state machine** ([`link`]), driven by a central
//!   discrete-event clock ([`sched`]): connection events, packet exchange with 1-bit
//!   sequence numbers, retransmission, channel selection, the in-band channel map
//!   update procedure, and supervision timeout;
//! * the **channel classifiers** ([`afh`]): a baseline per-channel PER estimator and the
//!   enhanced short/long-window variant with exclusion and informed exploration.
//!
//! They cooperate through a narrow contract: the link layer reports per-packet
//! reception outcomes per channel, the classifier periodically produces a new
//! used-channel list, and the link layer enforces it over the air.
//!
//! Everything runs single-threaded and cooperatively: components never block or sleep,
//! they return the absolute microsecond timestamp at which they next want to run, and
//! the scheduler drives them. Time is integer microseconds throughout; one seeded
//! random stream makes runs with the same seed byte-identical.
//!
//! A scenario is described in a TOML file (see [`scenario`]), built into a
//! [`sim::Simulation`], and run to completion:
//!
//! ```no_run
//! use piconet::scenario::ScenarioConfig;
//!
//! let cfg = ScenarioConfig::load(std::path::Path::new("scenario.toml"))?;
//! let mut sim = cfg.build()?;
//! sim.run();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[macro_use]
mod utils;

pub mod afh;
pub mod bytes;
mod crc;
mod error;
pub mod link;
pub mod medium;
pub mod node;
pub mod pcap;
pub mod phy;
pub mod scenario;
pub mod sched;
pub mod sim;
pub mod stats;
pub mod time;

pub use self::error::Error;
