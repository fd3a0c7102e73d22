pub mod dispatcher;
pub mod dos_protection;
pub mod protocol;
pub mod session;
pub mod transport;
