#![allow(dead_code)]

pub mod fixtures;
pub mod ollama_mock;
