pub mod gpio;
pub mod system;
pub mod uart;
