#![allow(dead_code)]

pub mod entities;
pub mod frames;
pub mod providers;
pub mod schedule;
pub mod world;
