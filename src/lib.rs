use tokio::io::{AsyncRead, AsyncWrite};

pub mod config;
pub mod crc;
pub mod dlci;
pub mod error;
pub mod handler;
pub mod mux;
pub mod parser;
pub mod registry;
pub mod sync;
pub mod transport;
pub mod types;
pub mod utils;

pub use config::MuxConfig;
pub use dlci::DlciState;
pub use error::{MuxError, Result};
pub use mux::{Mux, PortConsumer};
pub use registry::{MuxId, MuxRegistry};

pub trait ReadWrite: AsyncRead + AsyncWrite + Unpin + Send + Sync {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> ReadWrite for T {}

pub trait AsyncReading: AsyncRead + Unpin + Send + Sync {}
impl<T: AsyncRead + Unpin + Send + Sync> AsyncReading for T {}

pub trait AsyncWriting: AsyncWrite + Unpin + Send + Sync {}
impl<T: AsyncWrite + Unpin + Send + Sync> AsyncWriting for T {}
