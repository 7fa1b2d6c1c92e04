//! Ticket codec: signed payload <-> QR symbol.
//!
//! The payload is a concatenation of fields, each one written as a SCALE
//! compact length followed by the SCALE encoding of the field:
//! draw id, numbers, issue timestamp, signature.
//! Fields appended after the signature are ignored by the decoder.

use crate::error::{DecodeError, DecodeError::*};
#[cfg(feature = "std")]
use crate::error::RedemptionError;
use crate::types::Ticket;
use crate::{DrawNumber, Number, TicketId, Timestamp};
#[cfg(feature = "std")]
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "std")]
use qrcode::{Color, EcLevel, QrCode};
use scale::{Compact, Decode, DecodeAll, Encode};
use sp_core::hashing::blake2_256;
use sp_core::{sr25519, Pair};

/// Domain separator prepended to the signed message
pub const SIGNING_CONTEXT: &[u8] = b"lotto-redemption/ticket/v1";

/// Width of the blank border around the symbol, in modules
pub const QUIET_ZONE: usize = 4;

#[cfg(feature = "std")]
const DARK: u8 = 0;
#[cfg(feature = "std")]
const LIGHT: u8 = 255;

/// Public key of the issuing authority (sr25519)
#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct IssuerKey(pub [u8; 32]);

impl IssuerKey {
    pub fn from_hex(key: &str) -> Result<Self, DecodeError> {
        let without_0x = key.trim().trim_start_matches("0x");
        let bytes = hex::decode(without_0x).map_err(|_| InvalidHex)?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| InvalidKeyLength)?;
        Ok(Self(key))
    }
}

/// 8-bit greyscale image, row major
#[cfg(feature = "std")]
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct SymbolImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

#[cfg(feature = "std")]
impl SymbolImage {
    /// `None` outside of the image
    pub fn pixel(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y.checked_mul(self.width)?.checked_add(x)?).copied()
    }

    fn is_consistent(&self) -> bool {
        self.width.checked_mul(self.height) == Some(self.pixels.len())
    }
}

/// message signed by the issuer
pub fn signing_message(draw_id: DrawNumber, numbers: &[Number], issued_at: Timestamp) -> Vec<u8> {
    let mut message = SIGNING_CONTEXT.to_vec();
    (draw_id, numbers, issued_at).encode_to(&mut message);
    message
}

/// Identifier of the ticket, derived from the signed claim and its signature
pub fn ticket_id(ticket: &Ticket) -> TicketId {
    let mut input = signing_message(ticket.draw_id, &ticket.numbers, ticket.issued_at);
    input.extend_from_slice(&ticket.signature);
    blake2_256(&input)
}

/// Check the signature embedded in the ticket.
/// Must be called before trusting any decoded payload.
pub fn verify(ticket: &Ticket, issuer_key: &IssuerKey) -> bool {
    let signature = sr25519::Signature::from_raw(ticket.signature);
    let public = sr25519::Public::from_raw(issuer_key.0);
    let message = signing_message(ticket.draw_id, &ticket.numbers, ticket.issued_at);
    sr25519::Pair::verify(&signature, message, &public)
}

fn write_field<T: Encode>(output: &mut Vec<u8>, field: &T) {
    let bytes = field.encode();
    Compact(bytes.len() as u32).encode_to(output);
    output.extend_from_slice(&bytes);
}

fn read_field<'a>(input: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    if input.is_empty() {
        return Err(MissingField);
    }
    let len = Compact::<u32>::decode(input).map_err(|_| TruncatedField)?.0 as usize;
    if input.len() < len {
        return Err(TruncatedField);
    }
    let (field, rest) = input.split_at(len);
    *input = rest;
    Ok(field)
}

fn decode_field<T: Decode>(input: &mut &[u8]) -> Result<T, DecodeError> {
    let mut field = read_field(input)?;
    T::decode_all(&mut field).map_err(|_| MalformedField)
}

pub fn to_payload(ticket: &Ticket) -> Vec<u8> {
    let mut payload = Vec::new();
    write_field(&mut payload, &ticket.draw_id);
    write_field(&mut payload, &ticket.numbers);
    write_field(&mut payload, &ticket.issued_at);
    write_field(&mut payload, &ticket.signature);
    payload
}

pub fn from_payload(payload: &[u8]) -> Result<Ticket, DecodeError> {
    let mut input = payload;
    let draw_id = decode_field(&mut input)?;
    let numbers = decode_field(&mut input)?;
    let issued_at = decode_field(&mut input)?;
    let signature = decode_field(&mut input)?;

    // fields appended by a newer issuer are skipped
    while !input.is_empty() {
        read_field(&mut input)?;
    }

    Ok(Ticket {
        draw_id,
        numbers,
        issued_at,
        signature,
    })
}

#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TicketCodec {
    /// size of a module in pixels
    module_size: usize,
}

#[cfg(feature = "std")]
impl Default for TicketCodec {
    fn default() -> Self {
        Self { module_size: 4 }
    }
}

#[cfg(feature = "std")]
impl TicketCodec {
    pub fn new(module_size: usize) -> Self {
        Self {
            module_size: module_size.max(1),
        }
    }

    /// Render the signed payload of the ticket into a QR symbol
    pub fn encode(&self, ticket: &Ticket) -> Result<SymbolImage, RedemptionError> {
        let text = hex::encode_upper(to_payload(ticket));
        let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::M)
            .map_err(|_| RedemptionError::SymbolTooLarge)?;

        let modules = code.width();
        let colors = code.to_colors();
        let size = (modules + 2 * QUIET_ZONE)
            .checked_mul(self.module_size)
            .ok_or(RedemptionError::SymbolTooLarge)?;
        let area = size
            .checked_mul(size)
            .ok_or(RedemptionError::SymbolTooLarge)?;
        let mut pixels = vec![LIGHT; area];

        for (i, color) in colors.iter().enumerate() {
            if *color != Color::Dark {
                continue;
            }
            let left = (i % modules + QUIET_ZONE) * self.module_size;
            let top = (i / modules + QUIET_ZONE) * self.module_size;
            for y in top..top + self.module_size {
                let row = y * size;
                pixels[row + left..row + left + self.module_size].fill(DARK);
            }
        }

        Ok(SymbolImage {
            width: size,
            height: size,
            pixels,
        })
    }

    /// Extract the payload from the first symbol found in the image
    pub fn read_payload(&self, symbol: &SymbolImage) -> Result<Vec<u8>, DecodeError> {
        if !symbol.is_consistent() {
            return Err(UnreadableSymbol);
        }
        let mut image =
            rqrr::PreparedImage::prepare_from_greyscale(symbol.width, symbol.height, |x, y| {
                symbol.pixel(x, y).unwrap_or(LIGHT)
            });
        let grids = image.detect_grids();
        let grid = grids.first().ok_or(NoSymbolFound)?;
        let (_meta, content) = grid.decode().map_err(|e| {
            log::debug!("QR symbol cannot be decoded: {e:?}");
            UnreadableSymbol
        })?;
        hex::decode(content.trim()).map_err(|_| InvalidHex)
    }

    pub fn decode(&self, symbol: &SymbolImage) -> Result<Ticket, DecodeError> {
        let payload = self.read_payload(symbol)?;
        from_payload(&payload)
    }
}

/// Signs tickets on behalf of the issuing authority
pub struct TicketIssuer {
    pair: sr25519::Pair,
}

impl TicketIssuer {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            pair: sr25519::Pair::from_seed(seed),
        }
    }

    pub fn public_key(&self) -> IssuerKey {
        IssuerKey(self.pair.public().0)
    }

    pub fn issue(&self, draw_id: DrawNumber, numbers: Vec<Number>, issued_at: Timestamp) -> Ticket {
        let message = signing_message(draw_id, &numbers, issued_at);
        let signature = self.pair.sign(&message);
        Ticket {
            draw_id,
            numbers,
            issued_at,
            signature: signature.0,
        }
    }
}
