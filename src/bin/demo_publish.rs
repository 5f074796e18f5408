// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Publishes a growing counter payload to a named channel at a fixed
// interval. Run alongside demo_subscribe against the same channel name.
//
// Usage:
//   demo_publish <channel-name> <interval-ms>

use std::time::Duration;

use achannel::{Channel, CreateAttrs};

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: demo_publish <channel-name> <interval-ms>");
        std::process::exit(1);
    }
    let name = &args[1];
    let interval_ms: u64 = args[2].parse().expect("interval-ms must be an integer");

    let mut channel = Channel::create(name, 16, 256, &CreateAttrs::new().with_truncate(true))
        .expect("create channel");
    println!("publish: channel '{name}' ready");

    let mut counter: u64 = 0;
    loop {
        let payload = format!("tick {counter}");
        channel.publish(payload.as_bytes()).expect("publish");
        println!("publish: sent {payload:?}");
        counter += 1;
        std::thread::sleep(Duration::from_millis(interval_ms));
    }
}
