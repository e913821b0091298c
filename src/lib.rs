pub mod branding;
pub mod config;
pub mod dns;
pub mod error;
pub mod labels;
pub mod meta;
pub mod mods;
pub mod ports;
pub mod properties;
pub mod registry;
pub mod runtime;
pub mod sandbox;
pub mod servers;
pub mod web;

#[cfg(test)]
pub mod testing;
