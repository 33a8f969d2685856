//! Pairing-code rendering.

use std::io::Cursor;

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    chatgate_store::ConnectionStatus,
    image::{DynamicImage, ImageFormat, Luma},
    qrcode::{EcLevel, QrCode as Matrix, render::unicode},
    serde::{Deserialize, Serialize},
};

use crate::error::{Context, Result};

const IMAGE_SIZE: u32 = 256;

/// Pairing artifact handed to clients and published on `qrcode.update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// PNG of the code, base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    pub connection: ConnectionStatus,
}

impl QrCode {
    /// Render `code` at high error correction.
    pub fn render(code: &str) -> Result<Self> {
        Ok(Self {
            code: Some(code.to_string()),
            base64: Some(png_base64(code)?),
            connection: ConnectionStatus::Connecting,
        })
    }

    /// No code to show, only the link state.
    pub fn state(connection: ConnectionStatus) -> Self {
        Self {
            code: None,
            base64: None,
            connection,
        }
    }
}

fn matrix(code: &str) -> Result<Matrix> {
    Matrix::with_error_correction_level(code.as_bytes(), EcLevel::H)
        .context("failed to render QR code")
}

/// PNG rendering, base64 encoded without a data-URI prefix.
pub fn png_base64(code: &str) -> Result<String> {
    let image = matrix(code)?
        .render::<Luma<u8>>()
        .min_dimensions(IMAGE_SIZE, IMAGE_SIZE)
        .build();
    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to render QR code")?;
    Ok(STANDARD.encode(png))
}

/// Half-block rendering for a terminal, two modules per character row.
pub fn terminal(code: &str) -> Result<String> {
    Ok(matrix(code)?
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_produces_a_png() {
        let qr = QrCode::render("2@AbCdEf,ghIJ,klMN==").unwrap();
        assert_eq!(qr.connection, ConnectionStatus::Connecting);
        let png = STANDARD.decode(qr.base64.unwrap()).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let img = image::load_from_memory(&png).unwrap();
        assert!(img.width() >= IMAGE_SIZE);
    }

    #[test]
    fn terminal_rendering_is_multiline() {
        let art = terminal("2@abc").unwrap();
        assert!(art.lines().count() > 10);
    }

    #[test]
    fn state_only_serialises_connection() {
        let v = serde_json::to_value(QrCode::state(ConnectionStatus::Open)).unwrap();
        assert_eq!(v, serde_json::json!({"connection": "open"}));
    }
}
