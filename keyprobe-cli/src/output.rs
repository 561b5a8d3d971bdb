//! Human-readable and JSON rendering of probe results.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use keyprobe_core::{
    Comparison, Exchange, KeyCredential, KeyReport, KeyVerdict, MonitorReport, ProbeError,
    ProbeOutcome, ProbeRequest, describe_duration,
};
use serde::Serialize;

const WIDE: usize = 70;
const NARROW: usize = 50;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output to JSON")?;
    println!("{json}");
    Ok(())
}

fn rule(ch: char, width: usize) -> String {
    ch.to_string().repeat(width)
}

fn headline(err: &ProbeError) -> String {
    match err {
        ProbeError::Unauthorized { .. } => "UNAUTHORIZED - Invalid API key".to_string(),
        ProbeError::NotFound { .. } => "NOT FOUND - City not found".to_string(),
        ProbeError::RateLimited { .. } => "RATE LIMITED - Too many requests".to_string(),
        ProbeError::Http { code, .. } => format!("ERROR - HTTP {code}"),
        ProbeError::Timeout { after_ms } => format!(
            "TIMEOUT - Request timed out after {}",
            describe_duration(Duration::from_millis(*after_ms))
        ),
        ProbeError::ConnectionFailure { .. } => "CONNECTION ERROR - Cannot reach API server".to_string(),
        ProbeError::MalformedResponse { .. } => "MALFORMED RESPONSE - Unexpected payload".to_string(),
        ProbeError::Unexpected { .. } => "UNEXPECTED ERROR".to_string(),
    }
}

/// Print one outcome, each line prefixed with `indent`.
pub fn print_outcome(outcome: &ProbeOutcome, indent: &str) {
    match outcome {
        ProbeOutcome::Active(obs) => {
            println!("{indent}✅ SUCCESS");
            if let Some(location) = &obs.location {
                println!("{indent}   Location: {location}");
            }
            println!("{indent}   Temperature: {:.1}°C", obs.temperature_celsius);
            println!("{indent}   Description: {}", obs.description);
            if let Some(humidity) = obs.humidity_percent {
                println!("{indent}   Humidity: {humidity}%");
            }
        }
        ProbeOutcome::Failed(err) => {
            println!("{indent}❌ {}", headline(err));
            match err {
                ProbeError::Http {
                    message: None,
                    raw_body: Some(raw),
                    ..
                } => println!("{indent}   Raw Response: {raw}"),
                ProbeError::ConnectionFailure { message }
                | ProbeError::MalformedResponse { message }
                | ProbeError::Unexpected { message } => println!("{indent}   Detail: {message}"),
                ProbeError::Timeout { .. } => {}
                _ => {
                    if let Some(message) = err.provider_message() {
                        println!("{indent}   Message: {message}");
                    }
                }
            }
        }
    }
}

pub fn print_comparison(comparison: &Comparison, keys: &[KeyCredential]) {
    println!("{}", rule('=', WIDE));
    println!("OpenWeatherMap API Key Comparison Test");
    println!("{}", rule('=', WIDE));
    println!("Test Time: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));

    for (report, key) in comparison.reports.iter().zip(keys) {
        println!();
        println!("{}", rule('=', NARROW));
        println!("Testing key '{}'", report.label);
        println!("Key: {}", key.masked());
        println!("{}", rule('=', NARROW));

        for city in &report.outcomes {
            println!();
            println!("  Testing: {}", city.city);
            println!("  {}", rule('-', 25));
            print_outcome(&city.outcome, "  ");
        }

        println!();
        println!(
            "  Results: {}/{} cities successful",
            report.success_count, report.total_cities
        );
        match report.verdict() {
            KeyVerdict::FullyWorking => println!("  🎉 THIS KEY WORKS PERFECTLY!"),
            KeyVerdict::PartiallyWorking => println!("  ⚠️  Partial success"),
            KeyVerdict::Failed => println!("  🚨 This key failed all tests"),
        }
    }

    println!();
    println!("{}", rule('=', WIDE));
    println!("FINAL RESULTS");
    println!("{}", rule('=', WIDE));

    let recommended = comparison
        .recommended()
        .and_then(|r| keys.iter().find(|k| k.label == r.label));

    match recommended {
        Some(key) => {
            println!("🎉 WORKING API KEY FOUND: '{}'", key.label);
            println!("   Key: {}", key.masked());
        }
        None => {
            println!("🚨 NO FULLY WORKING API KEY FOUND");
            println!("   Please check:");
            println!("   - API key activation status");
            println!("   - Account validity");
            println!("   - Network connectivity");
        }
    }
}

pub fn print_key_test(report: &KeyReport, key: &KeyCredential) {
    println!("{}", rule('=', 60));
    println!("OpenWeatherMap API Key Tester");
    println!("{}", rule('=', 60));
    println!("API Key: {} ('{}')", key.masked(), key.label);
    println!("Test Time: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("{}", rule('-', 60));

    for city in &report.outcomes {
        println!();
        println!("Testing: {}", city.city);
        println!("{}", rule('-', 30));
        print_outcome(&city.outcome, "");
    }

    println!();
    println!("{}", rule('=', 60));
    println!("SUMMARY");
    println!("{}", rule('=', 60));
    println!("Total Tests: {}", report.total_cities);
    println!("Successful: {}", report.success_count);
    println!("Failed: {}", report.failure_count());
    println!("Success Rate: {:.1}%", report.success_rate());

    match report.verdict() {
        KeyVerdict::FullyWorking => {
            println!();
            println!("🎉 ALL TESTS PASSED - Your API key is working correctly!");
        }
        KeyVerdict::Failed => {
            println!();
            println!("🚨 ALL TESTS FAILED - Check your API key and network connection");
            println!();
            println!("Common issues:");
            println!("- API key not activated (can take up to 2 hours)");
            println!("- Invalid API key");
            println!("- Network/firewall issues");
        }
        KeyVerdict::PartiallyWorking => {
            println!();
            println!(
                "⚠️  PARTIAL SUCCESS - {}/{} tests passed",
                report.success_count, report.total_cities
            );
        }
    }
}

pub fn print_check(request: &ProbeRequest, exchange: &Exchange) {
    println!("Testing single city: {}", request.city);
    println!("Full URL: {}", request.redacted_url());
    if let Some(status) = exchange.status {
        println!("Status Code: {status}");
    }
    if let Some(body) = &exchange.body {
        println!("Raw Response: {body}");
    }
    if let Some(parsed) = exchange.parsed_body() {
        match serde_json::to_string_pretty(&parsed) {
            Ok(pretty) => println!("Parsed Data: {pretty}"),
            Err(err) => println!("Parsed Data: <unprintable: {err}>"),
        }
    }
    println!();
    print_outcome(&exchange.outcome, "");
}

pub fn print_monitor_banner(key: &KeyCredential, request: &ProbeRequest, interval: Duration) {
    println!("{}", rule('=', 60));
    println!("OpenWeatherMap API Key Activation Monitor");
    println!("{}", rule('=', 60));
    println!("API Key: {}", key.masked());
    println!("City: {}", request.city);
    println!("Started: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("Check interval: {}", describe_duration(interval));
    println!("Press Ctrl+C to stop monitoring");
    println!("{}", rule('-', 60));
}

pub fn print_monitor_attempt(attempt: u32, outcome: &ProbeOutcome, interval: Duration) {
    println!();
    println!("Check #{attempt}:");
    match outcome {
        ProbeOutcome::Failed(ProbeError::Unauthorized { .. }) => {
            println!("   ⏳ Still waiting... API key not activated yet");
            println!("   Time checked: {}", Local::now().format("%H:%M:%S"));
        }
        _ => print_outcome(outcome, "   "),
    }
    if !outcome.is_active() {
        println!("   Next check in {}...", describe_duration(interval));
    }
}

pub fn print_monitor_result(report: &MonitorReport) {
    println!();
    if report.is_active() {
        println!("🎉 SUCCESS! API key is now ACTIVE!");
        if let Some(obs) = report.outcome.observation() {
            println!(
                "   Weather: {:.1}°C, {}",
                obs.temperature_celsius, obs.description
            );
        }
        println!(
            "   Time activated: {}",
            report.finished_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    } else if report.cancelled {
        println!("👋 Monitoring stopped by user after {} check(s)", report.attempts);
    } else {
        print_outcome(&report.outcome, "");
    }
}
