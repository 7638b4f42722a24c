pub mod enums;
pub mod lightcurves;
pub mod o11y;
pub mod testing;
