//! 基于 `serialport` 的真实串口适配器

use crate::{LinkSettings, MlcFrame, SerialAdapter, SerialError};
use std::io::{ErrorKind, Read, Write};
use tracing::{debug, trace};

/// 真实串口通道
pub struct SerialPortAdapter {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialPortAdapter {
    /// 以固定链路参数打开串口
    ///
    /// 打开后立即清空收发缓冲区。
    pub fn open(path: &str, settings: &LinkSettings) -> Result<Self, SerialError> {
        let port = serialport::new(path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(settings.flow_control)
            .timeout(settings.read_timeout)
            .open()?;

        let mut adapter = Self {
            port,
            name: path.to_string(),
        };
        adapter.clear()?;
        debug!(
            "Opened serial port {} at {} baud",
            adapter.name, settings.baud_rate
        );
        Ok(adapter)
    }
}

impl SerialAdapter for SerialPortAdapter {
    fn write_frame(&mut self, frame: &MlcFrame) -> Result<(), SerialError> {
        self.port.write_all(frame.as_bytes())?;
        // flush 等待驱动把字节真正送出
        self.port.flush()?;
        trace!("{} TX {:02X?}", self.name, frame.data);
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        match self.port.read(buf) {
            Ok(0) => Err(SerialError::Closed),
            Ok(n) => {
                trace!("{} RX {:02X?}", self.name, &buf[..n]);
                Ok(n)
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(SerialError::Io(e)),
        }
    }

    fn clear(&mut self) -> Result<(), SerialError> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 串口枚举结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub port_name: String,
    /// "usb" / "pci" / "bluetooth" / "unknown"
    pub port_type: &'static str,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// 枚举本机可用串口
pub fn available_ports() -> Result<Vec<PortInfo>, SerialError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            serialport::SerialPortType::UsbPort(info) => PortInfo {
                port_name: p.port_name,
                port_type: "usb",
                vid: Some(info.vid),
                pid: Some(info.pid),
                serial_number: info.serial_number,
                manufacturer: info.manufacturer,
                product: info.product,
            },
            serialport::SerialPortType::PciPort => PortInfo::bare(p.port_name, "pci"),
            serialport::SerialPortType::BluetoothPort => PortInfo::bare(p.port_name, "bluetooth"),
            serialport::SerialPortType::Unknown => PortInfo::bare(p.port_name, "unknown"),
        })
        .collect())
}

impl PortInfo {
    fn bare(port_name: String, port_type: &'static str) -> Self {
        Self {
            port_name,
            port_type,
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }
}
