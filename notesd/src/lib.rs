pub mod daemon;
pub mod dbus_api;
pub mod service;
pub mod sync;
