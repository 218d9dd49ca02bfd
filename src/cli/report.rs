//! Run summary
//!
//! Folds the event stream of a run into counts and latency figures.

use std::collections::BTreeMap;
use std::time::Duration;

use colored::Colorize;

use crate::engine::EngineEvent;

/// Aggregated events of one run
#[derive(Debug, Default)]
pub struct Report {
    pub started: usize,
    pub requests: usize,
    pub responses: usize,
    /// Error events by code
    pub errors: BTreeMap<String, usize>,
    latencies: Vec<u64>,
    pub completed: usize,
    pub failed: usize,
}

impl Report {
    pub fn record(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Started => self.started += 1,
            EngineEvent::Request => self.requests += 1,
            EngineEvent::Response { latency_nanos, .. } => {
                self.responses += 1;
                self.latencies.push(latency_nanos);
            }
            EngineEvent::Error(code) => *self.errors.entry(code).or_default() += 1,
        }
    }

    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.values().sum()
    }

    /// Minimum, mean and maximum write latency
    pub fn latency(&self) -> Option<(Duration, Duration, Duration)> {
        let min = *self.latencies.iter().min()?;
        let max = *self.latencies.iter().max()?;
        let total: u128 = self.latencies.iter().map(|&n| u128::from(n)).sum();
        let mean = u64::try_from(total / self.latencies.len() as u128).unwrap_or(u64::MAX);
        Some((
            Duration::from_nanos(min),
            Duration::from_nanos(mean),
            Duration::from_nanos(max),
        ))
    }

    pub fn print(&self) {
        println!("\n{}", "Events:".cyan());
        println!("  started    {}", self.started);
        println!("  request    {}", self.requests);
        println!("  response   {}", self.responses);
        if self.errors.is_empty() {
            println!("  error      {}", "0".dimmed());
        } else {
            println!("  error      {}", self.error_count().to_string().red());
            for (code, count) in &self.errors {
                println!("    {} {}", code.red(), count);
            }
        }

        if let Some((min, mean, max)) = self.latency() {
            println!("\n{}", "Send latency:".cyan());
            println!("  min {:?}  mean {:?}  max {:?}", min, mean, max);
        }

        println!("\n{}", "Sessions:".cyan());
        println!("  {} {}", "✓".green(), format!("{} completed", self.completed).green());
        if self.failed > 0 {
            println!("  {} {}", "✗".red(), format!("{} failed", self.failed).red());
        }
        println!();
    }
}
