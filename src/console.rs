//! Operator-facing console text. Diagnostics for developers go through `log`.

use chrono::NaiveDateTime;

const TITLE: &str = "Emotion Detector";
const VERSION_LINE: &str = "version 2.1 (Threaded, Fixed Webcam)";
const CREDIT: &str = "Created by Mr. Susanta Banik";
const RULE_WIDTH: usize = 150;

fn rule(label: &str) -> String {
    let label = format!(" :{label}: ");
    let left = 55;
    let right = RULE_WIDTH.saturating_sub(left + label.len());
    format!("{}{label}{}", "-".repeat(left), "-".repeat(right))
}

fn credits_box() -> String {
    let inner = format!("|{CREDIT}|");
    let dashes = "-".repeat(inner.len());
    let stars = "*".repeat(inner.len() + 4);
    format!("{stars}\n* {dashes} *\n* {inner} *\n* {dashes} *\n{stars}")
}

pub fn banner() -> String {
    let underline = "=".repeat(TITLE.len());
    format!(
        "{TITLE}\n{underline}\n {VERSION_LINE}\n\n{}\n\n{}\n[?]General Instructions:\n   ********************\n\n(1) Look At the camera/webcam properly..\n(2) Clean The Webcam for better outputs..\n(3) Press 'q' to exit...\n\n{}\n",
        credits_box(),
        rule("INSTRUCTIONS"),
        rule("Data Processing"),
    )
}

pub fn print_banner() {
    println!("{}", banner());
}

pub fn print_camera_open_failure() {
    println!("[!] Error: Could not open webcam.");
}

pub fn print_frame_read_failure() {
    println!("[!] Failed to grab frame.");
}

pub fn print_interrupted() {
    println!("\n[-] Interrupted by user.");
}

pub fn shutdown_message(at: NaiveDateTime) -> String {
    format!(
        "[-]Exited at: {} On {}",
        at.format("%I:%M %p"),
        at.format("%d %B %Y, %A")
    )
}

pub fn print_shutdown(at: NaiveDateTime) {
    println!("{}", shutdown_message(at));
    println!("{}", rule("COMPLETE"));
}
