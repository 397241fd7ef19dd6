//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Input device access ([`device`])
//! - Ring-buffered capture with snapshot reads ([`capture`])
//! - Stream-clocked deferred tasks ([`scheduler`])
//! - Envelope-based event detection ([`detector`])
//! - Event and result types ([`latency`])
//! - Trial orchestration ([`tester`])

pub mod capture;
pub mod detector;
pub mod device;
pub mod latency;
pub mod scheduler;
pub mod tester;
