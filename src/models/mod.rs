pub mod checkpoint;
pub mod delivery;
pub mod directory;
pub mod order;
pub mod principal;
pub mod token;
pub mod trip;
pub mod verify;
