//! Geometry model
//!
//! Geometries arrive from the store as hex EWKB and leave the provider as
//! WKT. This module holds the in-memory model both codecs share:
//!
//! - `Coord`: one vertex; `z`/`m` are meaningful only when the owning
//!   geometry has the matching dimension flag
//! - `Shape`: the geometry tree
//! - `Geometry`: a shape plus dimension flags and optional SRID
//! - `Rect`: axis-aligned envelope used by rectangle filters and extents
//!
//! Surface types with no dedicated shape are normalized on decode:
//! triangles become polygons, TINs and polyhedral surfaces become
//! multipolygons.

pub mod wkb;
pub mod wkt;

use serde::{Deserialize, Serialize};

/// One vertex
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coord {
    /// X / easting / longitude
    pub x: f64,
    /// Y / northing / latitude
    pub y: f64,
    /// Elevation (only when the geometry has Z)
    pub z: f64,
    /// Measure (only when the geometry has M)
    pub m: f64,
}

impl Coord {
    /// 2D coordinate
    pub fn xy(x: f64, y: f64) -> Self {
        Coord { x, y, z: 0.0, m: 0.0 }
    }

    /// 3D coordinate
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Coord { x, y, z, m: 0.0 }
    }
}

/// A closed ring or open path
pub type Path = Vec<Coord>;

/// Geometry tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Point; `None` is the empty point
    Point(Option<Coord>),
    /// Line string
    LineString(Path),
    /// Polygon: exterior ring followed by holes
    Polygon(Vec<Path>),
    /// Multi point
    MultiPoint(Vec<Coord>),
    /// Multi line string
    MultiLineString(Vec<Path>),
    /// Multi polygon
    MultiPolygon(Vec<Vec<Path>>),
    /// Heterogeneous collection
    GeometryCollection(Vec<Shape>),
}

impl Shape {
    /// WKT / display name of the shape type
    pub fn type_name(&self) -> &'static str {
        match self {
            Shape::Point(_) => "Point",
            Shape::LineString(_) => "LineString",
            Shape::Polygon(_) => "Polygon",
            Shape::MultiPoint(_) => "MultiPoint",
            Shape::MultiLineString(_) => "MultiLineString",
            Shape::MultiPolygon(_) => "MultiPolygon",
            Shape::GeometryCollection(_) => "GeometryCollection",
        }
    }

    /// Visit every vertex
    pub fn for_each_coord(&self, f: &mut dyn FnMut(&Coord)) {
        match self {
            Shape::Point(p) => {
                if let Some(c) = p {
                    f(c)
                }
            }
            Shape::LineString(path) | Shape::MultiPoint(path) => path.iter().for_each(|c| f(c)),
            Shape::Polygon(rings) | Shape::MultiLineString(rings) => {
                rings.iter().flatten().for_each(|c| f(c))
            }
            Shape::MultiPolygon(polys) => polys.iter().flatten().flatten().for_each(|c| f(c)),
            Shape::GeometryCollection(parts) => parts.iter().for_each(|p| p.for_each_coord(f)),
        }
    }

    /// True when the shape has no vertices
    pub fn is_empty(&self) -> bool {
        let mut any = false;
        self.for_each_coord(&mut |_| any = true);
        !any
    }
}

/// A shape with its dimension flags and spatial reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Geometry tree
    pub shape: Shape,
    /// Coordinates carry Z
    pub has_z: bool,
    /// Coordinates carry M
    pub has_m: bool,
    /// Spatial reference identifier, when the encoding carried one
    pub srid: Option<i32>,
}

impl Geometry {
    /// 2D geometry without SRID
    pub fn new(shape: Shape) -> Self {
        Geometry {
            shape,
            has_z: false,
            has_m: false,
            srid: None,
        }
    }

    /// 2D point
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::new(Shape::Point(Some(Coord::xy(x, y))))
    }

    /// Builder: set SRID
    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = Some(srid);
        self
    }

    /// Builder: set dimension flags
    pub fn with_dimensions(mut self, has_z: bool, has_m: bool) -> Self {
        self.has_z = has_z;
        self.has_m = has_m;
        self
    }

    /// Envelope, `None` for empty geometries
    pub fn envelope(&self) -> Option<Rect> {
        let mut rect: Option<Rect> = None;
        self.shape.for_each_coord(&mut |c| {
            rect = Some(match rect {
                None => Rect::new(c.x, c.y, c.x, c.y),
                Some(r) => r.expand_to(c.x, c.y),
            });
        });
        rect
    }

    /// Export as WKT
    pub fn to_wkt(&self) -> String {
        wkt::write(self)
    }

    /// Parse WKT
    pub fn from_wkt(text: &str) -> crate::Result<Self> {
        wkt::read(text)
    }

    /// Decode hex EWKB
    pub fn from_hex_ewkb(hex: &str) -> crate::Result<Self> {
        wkb::decode_hex(hex)
    }

    /// Encode as hex EWKB (SRID included when present)
    pub fn to_hex_ewkb(&self) -> String {
        wkb::encode_hex(self)
    }
}

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Minimum x
    pub xmin: f64,
    /// Minimum y
    pub ymin: f64,
    /// Maximum x
    pub xmax: f64,
    /// Maximum y
    pub ymax: f64,
}

impl Rect {
    /// Create a rectangle, normalizing inverted corners
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Rect {
            xmin: x1.min(x2),
            ymin: y1.min(y2),
            xmax: x1.max(x2),
            ymax: y1.max(y2),
        }
    }

    fn expand_to(self, x: f64, y: f64) -> Self {
        Rect {
            xmin: self.xmin.min(x),
            ymin: self.ymin.min(y),
            xmax: self.xmax.max(x),
            ymax: self.ymax.max(y),
        }
    }

    /// Smallest rectangle covering both
    pub fn combine(&self, other: &Rect) -> Rect {
        Rect {
            xmin: self.xmin.min(other.xmin),
            ymin: self.ymin.min(other.ymin),
            xmax: self.xmax.max(other.xmax),
            ymax: self.ymax.max(other.ymax),
        }
    }

    /// Check if two rectangles overlap (touching edges count)
    pub fn intersects(&self, other: &Rect) -> bool {
        self.xmin <= other.xmax
            && self.xmax >= other.xmin
            && self.ymin <= other.ymax
            && self.ymax >= other.ymin
    }
}
