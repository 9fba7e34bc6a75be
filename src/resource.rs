//! VISA serial resource strings.
//!
//! Serial instruments are addressed with a compact subset of the VISA grammar:
//!
//! ```text
//! ASRL[<board>]::<address>::<baud>[::<dataflow>]::INSTR
//! ```
//!
//! - `address`: the port path handed to the transport (e.g. `/dev/ttyUSB0`, `COM3`)
//! - `baud`: line speed in bits per second
//! - `dataflow`: data bits, parity letter and stop bits, e.g. `8N1` or `7E2`.
//!   Omitted entirely, it defaults to `8N1`.
//!
//! # Example
//!
//! ```
//! use rust_asrl::resource::{Parity, ResourceDescriptor, StopBits};
//!
//! let resource: ResourceDescriptor = "ASRL::/dev/ttyUSB0::9600::8N2::INSTR".parse()?;
//! assert_eq!(resource.address(), "/dev/ttyUSB0");
//! assert_eq!(resource.baud_rate(), 9600);
//! assert_eq!(resource.parity(), Parity::None);
//! assert_eq!(resource.stop_bits(), StopBits::Two);
//! # Ok::<(), rust_asrl::error::ParseError>(())
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Interface tag for serial resources.
pub const INTERFACE_TYPE: &str = "ASRL";

/// Resource class tag for message-based instruments.
pub const RESOURCE_CLASS: &str = "INSTR";

const DELIMITER: &str = "::";

/// Number of data bits per character
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataBits {
    /// 5 bits
    Five,
    /// 6 bits
    Six,
    /// 7 bits
    Seven,
    /// 8 bits
    Eight,
}

impl DataBits {
    /// Bit count as a number.
    pub fn count(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Parity modes for serial communication
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

impl Parity {
    fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

/// Number of stop bits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopBits {
    /// One stop bit
    One,
    /// Two stop bits
    Two,
}

impl StopBits {
    /// Stop bit count as a number.
    pub fn count(self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Serial framing parameters decoded from a dataflow code such as `8N1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dataflow {
    /// Data bits per character
    pub data_bits: DataBits,
    /// Parity setting
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
}

impl Dataflow {
    /// Recognized dataflow codes and their framing.
    pub const KNOWN: [(&'static str, Dataflow); 5] = [
        ("8N1", Dataflow::new(DataBits::Eight, Parity::None, StopBits::One)),
        ("8N2", Dataflow::new(DataBits::Eight, Parity::None, StopBits::Two)),
        ("7E2", Dataflow::new(DataBits::Seven, Parity::Even, StopBits::Two)),
        ("7E1", Dataflow::new(DataBits::Seven, Parity::Even, StopBits::One)),
        ("7O1", Dataflow::new(DataBits::Seven, Parity::Odd, StopBits::One)),
    ];

    const fn new(data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        Self {
            data_bits,
            parity,
            stop_bits,
        }
    }

    /// Look up a three character dataflow code.
    pub fn from_code(code: &str) -> Result<Self, ParseError> {
        Self::KNOWN
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, dataflow)| *dataflow)
            .ok_or_else(|| ParseError::InvalidDataflow(code.to_string()))
    }
}

impl Default for Dataflow {
    fn default() -> Self {
        Dataflow::new(DataBits::Eight, Parity::None, StopBits::One)
    }
}

impl fmt::Display for Dataflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.data_bits.count(),
            self.parity.letter(),
            self.stop_bits.count()
        )
    }
}

/// A validated `ASRL` resource.
///
/// Only produced by [`ResourceDescriptor::parse`], so every instance carries a
/// matched interface type, resource class and full set of port parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    board_index: Option<u32>,
    address: String,
    baud_rate: u32,
    dataflow: Dataflow,
}

impl ResourceDescriptor {
    /// Parse a resource string such as `ASRL::/dev/ttyUSB0::9600::8N2::INSTR`.
    ///
    /// # Errors
    /// Returns the [`ParseError`] variant naming the first offending segment.
    pub fn parse(resource: &str) -> Result<Self, ParseError> {
        let segments: Vec<&str> = resource.split(DELIMITER).collect();

        let board_index = parse_interface(segments[0])?;

        let class = segments[segments.len() - 1];
        if segments.len() < 2 || class != RESOURCE_CLASS {
            return Err(ParseError::InvalidResourceClass(class.to_string()));
        }

        let (address, baud, dataflow) = match segments.as_slice() {
            [_, address, baud, _] => (*address, *baud, None),
            [_, address, baud, dataflow, _] => (*address, *baud, Some(*dataflow)),
            _ => return Err(ParseError::MalformedResource(segments.len())),
        };

        if address.chars().any(char::is_whitespace) {
            return Err(ParseError::InvalidAddress(address.to_string()));
        }

        let baud_rate = parse_baud(baud)?;

        let dataflow = match dataflow {
            Some(code) => Dataflow::from_code(code)?,
            None => Dataflow::default(),
        };

        Ok(Self {
            board_index,
            address: address.to_string(),
            baud_rate,
            dataflow,
        })
    }

    /// Always [`INTERFACE_TYPE`].
    pub fn interface_type(&self) -> &'static str {
        INTERFACE_TYPE
    }

    /// Board index following `ASRL`, if one was given.
    pub fn board_index(&self) -> Option<u32> {
        self.board_index
    }

    /// Transport locator, typically a device path.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Line speed in bits per second.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Decoded dataflow code.
    pub fn dataflow(&self) -> Dataflow {
        self.dataflow
    }

    /// Data bits per character.
    pub fn data_bits(&self) -> DataBits {
        self.dataflow.data_bits
    }

    /// Parity setting.
    pub fn parity(&self) -> Parity {
        self.dataflow.parity
    }

    /// Stop bits.
    pub fn stop_bits(&self) -> StopBits {
        self.dataflow.stop_bits
    }

    /// Always [`RESOURCE_CLASS`].
    pub fn resource_class(&self) -> &'static str {
        RESOURCE_CLASS
    }
}

fn parse_interface(segment: &str) -> Result<Option<u32>, ParseError> {
    let invalid = || ParseError::InvalidInterfaceType(segment.to_string());

    let board = segment.strip_prefix(INTERFACE_TYPE).ok_or_else(invalid)?;
    if board.is_empty() {
        return Ok(None);
    }
    if !board.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    board.parse().map(Some).map_err(|_| invalid())
}

fn parse_baud(segment: &str) -> Result<u32, ParseError> {
    // u32::from_str also accepts a leading '+'
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidBaudRate(segment.to_string()));
    }
    segment
        .parse()
        .map_err(|_| ParseError::InvalidBaudRate(segment.to_string()))
}

impl FromStr for ResourceDescriptor {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(INTERFACE_TYPE)?;
        if let Some(board) = self.board_index {
            write!(f, "{board}")?;
        }
        write!(
            f,
            "::{}::{}::{}::{}",
            self.address, self.baud_rate, self.dataflow, RESOURCE_CLASS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_index() {
        let resource = ResourceDescriptor::parse("ASRL3::COM3::19200::8N1::INSTR").unwrap();
        assert_eq!(resource.board_index(), Some(3));
        assert_eq!(resource.address(), "COM3");

        let resource = ResourceDescriptor::parse("ASRL::COM3::19200::8N1::INSTR").unwrap();
        assert_eq!(resource.board_index(), None);
    }

    #[test]
    fn test_non_numeric_board_index() {
        assert_eq!(
            ResourceDescriptor::parse("ASRLx::COM3::19200::8N1::INSTR"),
            Err(ParseError::InvalidInterfaceType("ASRLx".to_string()))
        );
    }

    #[test]
    fn test_single_segment() {
        assert_eq!(
            ResourceDescriptor::parse("ASRL"),
            Err(ParseError::InvalidResourceClass("ASRL".to_string()))
        );
        assert_eq!(
            ResourceDescriptor::parse(""),
            Err(ParseError::InvalidInterfaceType(String::new()))
        );
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(
            ResourceDescriptor::parse("ASRL::9600::INSTR"),
            Err(ParseError::MalformedResource(3))
        );
        assert_eq!(
            ResourceDescriptor::parse("ASRL::a::b::9600::8N1::INSTR"),
            Err(ParseError::MalformedResource(6))
        );
    }

    #[test]
    fn test_baud_rejects_sign_and_overflow() {
        for baud in ["+9600", "-9600", "", "96k", "99999999999"] {
            let resource = format!("ASRL::/dev/ttyS0::{baud}::8N1::INSTR");
            assert_eq!(
                ResourceDescriptor::parse(&resource),
                Err(ParseError::InvalidBaudRate(baud.to_string())),
                "baud {baud:?}"
            );
        }
    }

    #[test]
    fn test_dataflow_is_case_sensitive() {
        assert_eq!(
            Dataflow::from_code("8n1"),
            Err(ParseError::InvalidDataflow("8n1".to_string()))
        );
    }

    #[test]
    fn test_display_is_canonical() {
        let resource = ResourceDescriptor::parse("ASRL2::/dev/ttyUSB1::4800::INSTR").unwrap();
        assert_eq!(resource.to_string(), "ASRL2::/dev/ttyUSB1::4800::8N1::INSTR");
        assert_eq!(resource.to_string().parse::<ResourceDescriptor>().unwrap(), resource);
    }
}
