pub mod replay;

pub use replay::ReplayCommand;
