//! Basic usage example for the P30 protocol over an in-memory device.

use inverter_device::{MemoryDevice, WhenExhausted};
use inverter_wire::{P30Protocol, WireError};
use std::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== P30 Protocol Example ===\n");

    let protocol = P30Protocol::new();
    let mut device = MemoryDevice::new();

    // 1. Frame a command
    println!("1. Writing QPIGS...");
    protocol.write(&mut device, "QPIGS")?;
    println!("   Frame on the wire: {:02X?}", device.output());

    // 2. Read it back as if the inverter had echoed it
    println!("\n2. Reading the frame back...");
    device.loop_back();
    device.set_chunk_size(3);
    device.set_idle_polls(1);
    let text = protocol.read(&mut device, Duration::from_secs(1)).await?;
    println!("   Decoded payload: {}", text);

    // 3. A response with a damaged digest
    println!("\n3. Reading a corrupted response...");
    device.set_input(&b"(ACK\x39\x21\r"[..]);
    match protocol.read(&mut device, Duration::from_secs(1)).await {
        Err(e @ WireError::DigestMismatch { .. }) => println!("   Rejected: {}", e),
        other => println!("   Unexpected: {:?}", other),
    }

    // 4. A response that never completes
    println!("\n4. Reading a response cut short...");
    device.set_input(&b"(230.0"[..]);
    device.set_when_exhausted(WhenExhausted::EndOfStream);
    if let Err(e) = protocol.read(&mut device, Duration::from_secs(1)).await {
        println!("   Failed: {} (recoverable: {})", e, e.is_recoverable());
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
