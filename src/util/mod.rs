pub mod clock;
pub mod currency;
