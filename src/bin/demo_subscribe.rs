// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Opens a named channel and blocks on each new frame as it arrives,
// printing missed-frame notices when it falls behind the publisher.
//
// Usage:
//   demo_subscribe <channel-name>

use achannel::{Channel, ChannelError, OpenAttrs, ReceiveOptions};

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: demo_subscribe <channel-name>");
        std::process::exit(1);
    }
    let name = &args[1];

    let mut channel = Channel::open(name, &OpenAttrs::new()).expect("open channel");
    println!("subscribe: channel '{name}' opened");

    let mut buf = vec![0u8; 256];
    loop {
        match channel.receive(&mut buf, None, ReceiveOptions::new().with_wait(true)) {
            Ok(outcome) => {
                let payload = String::from_utf8_lossy(&buf[..outcome.len]);
                if outcome.missed_frame {
                    println!("subscribe: missed one or more frames before {payload:?}");
                } else {
                    println!("subscribe: received {payload:?}");
                }
            }
            Err(ChannelError::Canceled) => {
                println!("subscribe: canceled");
                break;
            }
            Err(e) => {
                eprintln!("subscribe: error: {e}");
                break;
            }
        }
    }
}
