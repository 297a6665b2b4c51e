use std::sync::Arc;

use mvt_reader::Reader;

use crate::canvas::Bitmap;
use crate::error::MapError;
use crate::geometry::CellKey;
use crate::multitasking::{BoxedTask, MicroTask, MicroTaskExt};
use crate::tile_map::fetcher::TileData;

/// Coordinate range of MVT features inside a tile.
pub const MVT_EXTENT: f32 = 4096.0;

#[derive(Debug, Clone)]
pub struct TileLayer {
    pub name: String,
    pub features: Vec<geo::Geometry<f32>>,
}

#[derive(Debug, Clone)]
pub enum ParsedTile {
    Vector(Arc<Vec<TileLayer>>),
    Raster(Bitmap),
}

impl ParsedTile {
    pub fn feature_count(&self) -> usize {
        match self {
            ParsedTile::Vector(layers) => layers.iter().map(|l| l.features.len()).sum(),
            ParsedTile::Raster(_) => 0,
        }
    }
}

/// Second stage of the tile pipeline.
pub trait TileDataParser: Send + Sync {
    fn parse(&self, key: &CellKey, data: TileData) -> BoxedTask<ParsedTile>;
}

/// Decodes vector tiles with mvt-reader and raster tiles with `image`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MvtTileParser;

impl TileDataParser for MvtTileParser {
    fn parse(&self, key: &CellKey, data: TileData) -> BoxedTask<ParsedTile> {
        match data {
            TileData::Vector(bytes) => MvtParseTask::new(*key, bytes).boxed(),
            TileData::Raster(bytes) => RasterParseTask {
                key: *key,
                bytes,
                result: None,
            }
            .boxed(),
        }
    }
}

/// Decodes the tile header on the first resume, then one layer per resume.
pub struct MvtParseTask {
    key: CellKey,
    bytes: Option<Arc<[u8]>>,
    reader: Option<Reader>,
    layer_names: Vec<String>,
    layers: Vec<TileLayer>,
    result: Option<ParsedTile>,
}

impl MvtParseTask {
    pub fn new(key: CellKey, bytes: Arc<[u8]>) -> Self {
        Self {
            key,
            bytes: Some(bytes),
            reader: None,
            layer_names: Vec::new(),
            layers: Vec::new(),
            result: None,
        }
    }

    fn parse_error(&self, reason: impl std::fmt::Debug) -> MapError {
        MapError::Parse {
            key: self.key,
            reason: format!("{reason:?}"),
        }
    }
}

impl MicroTask for MvtParseTask {
    type Output = ParsedTile;

    fn resume(&mut self) -> Result<(), MapError> {
        if let Some(bytes) = self.bytes.take() {
            let reader = Reader::new(bytes.to_vec()).map_err(|e| self.parse_error(e))?;
            self.layer_names = reader.get_layer_names().map_err(|e| self.parse_error(e))?;
            self.reader = Some(reader);
        } else if let Some(reader) = &self.reader {
            let index = self.layers.len();
            let features = reader
                .get_features(index)
                .map_err(|e| self.parse_error(e))?
                .into_iter()
                .map(|feature| feature.geometry)
                .collect();
            self.layers.push(TileLayer {
                name: self.layer_names[index].clone(),
                features,
            });
        }

        if self.layers.len() == self.layer_names.len() && self.reader.is_some() {
            self.reader = None;
            self.result = Some(ParsedTile::Vector(Arc::new(std::mem::take(&mut self.layers))));
        }
        Ok(())
    }

    fn alive(&self) -> bool {
        self.result.is_none()
    }

    fn get_result(&self) -> Option<ParsedTile> {
        self.result.clone()
    }
}

pub struct RasterParseTask {
    key: CellKey,
    bytes: Arc<[u8]>,
    result: Option<ParsedTile>,
}

impl MicroTask for RasterParseTask {
    type Output = ParsedTile;

    fn resume(&mut self) -> Result<(), MapError> {
        let bitmap = Bitmap::decode(&self.bytes).map_err(|e| MapError::Parse {
            key: self.key,
            reason: e.to_string(),
        })?;
        self.result = Some(ParsedTile::Raster(bitmap));
        Ok(())
    }

    fn alive(&self) -> bool {
        self.result.is_none()
    }

    fn get_result(&self) -> Option<ParsedTile> {
        self.result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(mut task: BoxedTask<ParsedTile>) -> Result<(ParsedTile, usize), MapError> {
        let mut resumes = 0;
        while task.alive() {
            task.resume()?;
            resumes += 1;
        }
        Ok((task.get_result().unwrap(), resumes))
    }

    #[test]
    fn garbage_vector_tile_is_a_parse_error() {
        let key = CellKey::new(2, 1, 1);
        let data = TileData::Vector(vec![0xff, 0x00, 0x13].into());
        let err = run(MvtTileParser.parse(&key, data)).unwrap_err();
        assert!(matches!(err, MapError::Parse { key: k, .. } if k == key));
    }

    #[test]
    fn empty_vector_tile_has_no_layers() {
        let data = TileData::Vector(Vec::new().into());
        let (tile, resumes) = run(MvtTileParser.parse(&CellKey::new(0, 0, 0), data)).unwrap();
        assert_eq!(resumes, 1);
        assert!(matches!(tile, ParsedTile::Vector(layers) if layers.is_empty()));
    }

    #[test]
    fn raster_tile_decodes_in_one_step() {
        let image = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 255, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let (tile, resumes) = run(MvtTileParser.parse(&CellKey::new(1, 0, 0), TileData::Raster(bytes.into()))).unwrap();
        assert_eq!(resumes, 1);
        let ParsedTile::Raster(bitmap) = tile else {
            panic!("expected a raster tile");
        };
        assert_eq!((bitmap.width, bitmap.height), (4, 4));
    }
}
