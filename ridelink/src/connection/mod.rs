pub mod codec;
pub mod frame;
pub mod manager;
pub mod state;
pub mod tcp;
pub mod transport;
