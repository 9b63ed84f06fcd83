//! End-to-end tests driving the engine with scripted platform adapters

mod engine_tests;
