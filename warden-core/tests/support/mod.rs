#![allow(dead_code)]

pub mod auth;
pub mod controlled;
