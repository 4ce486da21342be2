pub mod hash;
pub mod info;
pub mod pack;
pub mod run;
pub mod snapshot;
pub mod unpack;
