//! AMQP transport backend.

mod lapin;

pub use lapin::create_transport;
