//! Simulated controller: streams a rotating quaternion, a toggling A button
//! and an oscillating trigger to a running driver.
//!
//! Usage: cargo run --example send [host] [port]
//! Defaults to localhost:12345 (left hand; the right hand listens on 12346).

use simplecontroller::protocol::encode_sample;
use simplecontroller::{Buttons, Quaternion, Role, Sample};
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

const SEND_INTERVAL: Duration = Duration::from_millis(10);

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port = args
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(Role::Left.default_port());

    println!("Attempting to connect to {}:{}...", host, port);
    let mut stream = match TcpStream::connect((host.as_str(), port)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error connecting: {} (is the driver listening on {}?)", e, port);
            std::process::exit(1);
        }
    };
    stream.set_nodelay(true).ok();
    println!("Connected to {}:{}", host, port);

    let mut angle = 0.0f64;
    let mut trigger = 0.0f32;
    let mut direction = 1.0f32;
    let mut buttons = Buttons::empty();
    let mut count: u64 = 0;

    loop {
        // Rotation about Y.
        let orientation = Quaternion::new(0.0, (angle / 2.0).sin(), 0.0, (angle / 2.0).cos());
        angle += 0.05;

        count += 1;
        if count % 100 == 0 {
            buttons.toggle(Buttons::A_CLICK);
            println!("Button A: {}", buttons.contains(Buttons::A_CLICK));
        }

        trigger += 0.02 * direction;
        if trigger >= 1.0 {
            trigger = 1.0;
            direction = -1.0;
            buttons.insert(Buttons::TRIGGER_CLICK);
        } else if trigger <= 0.0 {
            trigger = 0.0;
            direction = 1.0;
            buttons.remove(Buttons::TRIGGER_CLICK);
        } else if trigger > 0.8 {
            buttons.insert(Buttons::TRIGGER_CLICK);
        } else if trigger < 0.7 {
            buttons.remove(Buttons::TRIGGER_CLICK);
        }

        let line = encode_sample(&Sample {
            orientation,
            buttons,
            trigger_value: trigger,
        });

        if let Err(e) = stream.write_all(line.as_bytes()) {
            eprintln!("Socket error sending data: {}", e);
            break;
        }
        std::thread::sleep(SEND_INTERVAL);
    }

    println!("Connection closed.");
}
