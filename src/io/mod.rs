//! Process-level I/O: signals, system event monitoring and the instance lock.

pub mod dbus;
pub mod lock;
pub mod signals;
