//! 串口列表

use anyhow::Result;
use mlc_serial::{PortInfo, available_ports};

/// 列出本机串口
pub fn execute() -> Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("未找到串口");
        return Ok(());
    }

    println!("📋 可用串口:");
    for port in &ports {
        println!("  {}", describe(port));
    }
    Ok(())
}

fn describe(port: &PortInfo) -> String {
    let mut line = format!("{:<20} {}", port.port_name, port.port_type);
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        line.push_str(&format!(" {:04x}:{:04x}", vid, pid));
    }
    if let Some(product) = &port.product {
        line.push_str(&format!(" {}", product));
    }
    if let Some(serial) = &port.serial_number {
        line.push_str(&format!(" (SN {})", serial));
    }
    line
}
