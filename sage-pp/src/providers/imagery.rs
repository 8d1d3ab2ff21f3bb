//! Top-down imagery heuristics
//!
//! Fetches a grayscale raster of the parcel and applies two fixed
//! heuristics: a brightness-threshold share for vegetation and an
//! edge-density measure for built structures. Both indicators are
//! provisional; the merge policy lets permit evidence override the
//! structure flag whenever permits say anything.

use crate::types::{
    ContextKey, FieldValue, Provider, ProviderError, ProviderResult, RunContext,
};
use async_trait::async_trait;
use tracing::debug;

const PROVIDER_ID: &str = "imagery";

/// Pixels brighter than this count toward the vegetation share.
const VEGETATION_LUMA_THRESHOLD: u8 = 100;
/// Vegetation is flagged when the bright share exceeds this fraction.
const VEGETATION_SHARE: f64 = 0.05;
/// A neighbor difference this large counts as an edge pixel.
const EDGE_DELTA: i16 = 60;
/// Structures are flagged when the edge share exceeds this fraction.
const EDGE_SHARE: f64 = 0.02;

/// A decoded grayscale raster.
#[derive(Debug)]
pub struct GrayImage {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

/// Decode a binary PGM (P5) payload with 8-bit samples. Header comments
/// are tolerated, 16-bit samples are not.
pub fn parse_pgm(bytes: &[u8]) -> Result<GrayImage, String> {
    let mut pos = 0usize;

    let mut token = |bytes: &[u8]| -> Result<Vec<u8>, String> {
        // skip whitespace and # comments
        loop {
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos < bytes.len() && bytes[pos] == b'#' {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            } else {
                break;
            }
        }
        let start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if start == pos {
            return Err("truncated header".to_string());
        }
        Ok(bytes[start..pos].to_vec())
    };

    if token(bytes)? != b"P5" {
        return Err("not a binary PGM".to_string());
    }
    let parse_num = |t: Vec<u8>| -> Result<usize, String> {
        std::str::from_utf8(&t)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| "bad header number".to_string())
    };
    let width = parse_num(token(bytes)?)?;
    let height = parse_num(token(bytes)?)?;
    let maxval = parse_num(token(bytes)?)?;
    if maxval == 0 || maxval > 255 {
        return Err(format!("unsupported maxval {}", maxval));
    }
    // exactly one whitespace byte separates header from samples
    pos += 1;

    let expected = width
        .checked_mul(height)
        .ok_or_else(|| "image dimensions overflow".to_string())?;
    let end = pos
        .checked_add(expected)
        .ok_or_else(|| "image dimensions overflow".to_string())?;
    let data = bytes
        .get(pos..end)
        .ok_or_else(|| "truncated pixel data".to_string())?;
    Ok(GrayImage {
        width,
        height,
        pixels: data.to_vec(),
    })
}

impl GrayImage {
    /// Fraction of pixels brighter than the vegetation threshold.
    pub fn bright_share(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let bright = self
            .pixels
            .iter()
            .filter(|&&p| p > VEGETATION_LUMA_THRESHOLD)
            .count();
        bright as f64 / self.pixels.len() as f64
    }

    /// Fraction of pixels whose right or lower neighbor differs sharply.
    /// Built structures produce long hard edges that natural ground
    /// cover does not.
    pub fn edge_share(&self) -> f64 {
        if self.width < 2 || self.height < 2 {
            return 0.0;
        }
        let mut edges = 0usize;
        for row in 0..self.height {
            for col in 0..self.width {
                let p = self.pixels[row * self.width + col] as i16;
                let right = (col + 1 < self.width)
                    .then(|| self.pixels[row * self.width + col + 1] as i16);
                let below = (row + 1 < self.height)
                    .then(|| self.pixels[(row + 1) * self.width + col] as i16);
                if right.is_some_and(|r| (p - r).abs() >= EDGE_DELTA)
                    || below.is_some_and(|b| (p - b).abs() >= EDGE_DELTA)
                {
                    edges += 1;
                }
            }
        }
        edges as f64 / self.pixels.len() as f64
    }
}

pub struct ImageryProvider {
    client: reqwest::Client,
    imagery_url: String,
    api_key: String,
}

impl ImageryProvider {
    pub fn new(client: reqwest::Client, imagery_url: String, api_key: String) -> Self {
        Self {
            client,
            imagery_url,
            api_key,
        }
    }

    async fn fetch_raster(&self, lat: f64, lon: f64) -> Result<(GrayImage, String), ProviderError> {
        let center = format!("{},{}", lat, lon);
        let response = self
            .client
            .get(&self.imagery_url)
            .query(&[
                ("center", center.as_str()),
                ("zoom", "19"),
                ("size", "400x400"),
                ("maptype", "satellite"),
                ("format", "pgm"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(ProviderError::from_status(
                response.status(),
                "imagery service",
            ));
        }
        let source = response.url().to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(ProviderError::from_reqwest)?;
        let image = parse_pgm(&bytes).map_err(ProviderError::ExtractionFailure)?;
        Ok((image, source))
    }
}

#[async_trait]
impl Provider for ImageryProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Coordinates]
    }

    fn supplies(&self) -> &'static [ContextKey] {
        &[]
    }

    async fn execute(&self, ctx: &RunContext) -> ProviderResult {
        let Some(coord) = ctx.coordinates() else {
            return ProviderResult::failure(
                self.id(),
                ProviderError::ExtractionFailure("no coordinates in context".to_string()),
            );
        };

        match self.fetch_raster(coord.lat, coord.lon).await {
            Ok((image, source)) => {
                let bright = image.bright_share();
                let edges = image.edge_share();
                debug!(
                    bright_share = bright,
                    edge_share = edges,
                    "Imagery heuristics evaluated"
                );
                ProviderResult::success(self.id())
                    .with_field(FieldValue::flag(
                        PROVIDER_ID,
                        "trees_present",
                        bright > VEGETATION_SHARE,
                        &source,
                    ))
                    .with_field(FieldValue::flag(
                        PROVIDER_ID,
                        "structures_present",
                        edges > EDGE_SHARE,
                        &source,
                    ))
            }
            Err(e) => ProviderResult::failure(self.id(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pgm(width: usize, height: usize, pixels: &[u8]) -> Vec<u8> {
        let mut bytes = format!("P5\n{} {}\n255\n", width, height).into_bytes();
        bytes.extend_from_slice(pixels);
        bytes
    }

    #[test]
    fn parses_valid_pgm_with_comment() {
        let mut bytes = b"P5\n# generated\n2 2\n255\n".to_vec();
        bytes.extend_from_slice(&[0, 50, 150, 250]);
        let image = parse_pgm(&bytes).unwrap();
        assert_eq!(image.width, 2);
        assert_eq!(image.height, 2);
        assert_eq!(image.pixels, vec![0, 50, 150, 250]);
    }

    #[test]
    fn rejects_truncated_and_non_pgm_payloads() {
        assert!(parse_pgm(b"P6\n2 2\n255\n____").is_err());
        assert!(parse_pgm(&pgm(4, 4, &[0; 3])).is_err());
        assert!(parse_pgm(b"").is_err());
    }

    #[test]
    fn uniform_dark_image_has_no_vegetation_or_structures() {
        let image = parse_pgm(&pgm(10, 10, &[40u8; 100])).unwrap();
        assert_eq!(image.bright_share(), 0.0);
        assert_eq!(image.edge_share(), 0.0);
    }

    #[test]
    fn bright_share_crosses_vegetation_threshold() {
        // 8 of 100 pixels bright: above the 5% share
        let mut pixels = [40u8; 100];
        for p in pixels.iter_mut().take(8) {
            *p = 200;
        }
        let image = parse_pgm(&pgm(10, 10, &pixels)).unwrap();
        assert!(image.bright_share() > VEGETATION_SHARE);
    }

    #[test]
    fn hard_rectangle_produces_edges() {
        // A 4x4 bright block inside a dark field
        let mut pixels = [30u8; 100];
        for row in 3..7 {
            for col in 3..7 {
                pixels[row * 10 + col] = 220;
            }
        }
        let image = parse_pgm(&pgm(10, 10, &pixels)).unwrap();
        assert!(image.edge_share() > EDGE_SHARE);
    }
}
