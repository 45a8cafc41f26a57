pub mod deframer;
pub mod frame;
pub mod mcc;
