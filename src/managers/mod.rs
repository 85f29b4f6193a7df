pub mod directory;
pub mod files;
pub mod intune;
pub mod tables;
