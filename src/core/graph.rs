//! Deferred raster expressions.
//!
//! A [`Graph`] records raster operations as nodes without computing anything.
//! An [`Evaluator`] binds named source rasters and materialises a node on
//! request, computing every intermediate at most once.

use crate::core::dilation::dilate;
use crate::core::patch::{connected_pixel_count, Connectivity, PatchFilter, PatchFilterParams};
use crate::core::resample::{Reprojector, Resampling};
use crate::types::{CmpOp, GridSpec, Raster, SclError, SclResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Handle to a node of a [`Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithOp {
    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Subtract => a - b,
            ArithOp::Multiply => a * b,
            ArithOp::Divide => a / b,
        }
    }
}

/// One deferred operation
#[derive(Debug, Clone)]
pub enum Expr {
    Source(String),
    Constant { value: f64, grid: GridSpec },
    /// `input * scale + offset`
    Affine { input: NodeId, scale: f64, offset: f64 },
    Arith { op: ArithOp, lhs: NodeId, rhs: NodeId },
    Compare { input: NodeId, op: CmpOp, value: f64 },
    CompareRaster { op: CmpOp, lhs: NodeId, rhs: NodeId },
    SelfMask(NodeId),
    UpdateMask { input: NodeId, mask: NodeId },
    Unmask { input: NodeId, fill: f64 },
    Remap { input: NodeId, table: BTreeMap<i64, f64> },
    Clamp { input: NodeId, min: f64, max: f64 },
    Where { input: NodeId, cond: NodeId, value: f64 },
    ConnectedPixelCount { input: NodeId, max_size: u64, connectivity: Connectivity },
    PatchFilter { input: NodeId, min_size: u64, connectivity: Connectivity },
    Dilate { input: NodeId, radius_px: u32 },
    Resample { input: NodeId, grid: GridSpec, method: Resampling },
}

/// Append-only expression graph; children always precede their parents
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Expr>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn expr(&self, id: NodeId) -> Option<&Expr> {
        self.nodes.get(id.0)
    }

    pub fn push(&mut self, expr: Expr) -> NodeId {
        self.nodes.push(expr);
        NodeId(self.nodes.len() - 1)
    }

    pub fn source(&mut self, name: &str) -> NodeId {
        self.push(Expr::Source(name.to_string()))
    }

    pub fn constant(&mut self, value: f64, grid: GridSpec) -> NodeId {
        self.push(Expr::Constant { value, grid })
    }

    pub fn multiply_by(&mut self, input: NodeId, factor: f64) -> NodeId {
        self.push(Expr::Affine { input, scale: factor, offset: 0.0 })
    }

    pub fn arith(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.push(Expr::Arith { op, lhs, rhs })
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.arith(ArithOp::Add, lhs, rhs)
    }

    pub fn multiply(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.arith(ArithOp::Multiply, lhs, rhs)
    }

    pub fn compare(&mut self, input: NodeId, op: CmpOp, value: f64) -> NodeId {
        self.push(Expr::Compare { input, op, value })
    }

    pub fn compare_raster(&mut self, lhs: NodeId, op: CmpOp, rhs: NodeId) -> NodeId {
        self.push(Expr::CompareRaster { op, lhs, rhs })
    }

    pub fn self_mask(&mut self, input: NodeId) -> NodeId {
        self.push(Expr::SelfMask(input))
    }

    pub fn update_mask(&mut self, input: NodeId, mask: NodeId) -> NodeId {
        self.push(Expr::UpdateMask { input, mask })
    }

    pub fn unmask(&mut self, input: NodeId, fill: f64) -> NodeId {
        self.push(Expr::Unmask { input, fill })
    }

    pub fn remap(&mut self, input: NodeId, table: BTreeMap<i64, f64>) -> NodeId {
        self.push(Expr::Remap { input, table })
    }

    pub fn clamp(&mut self, input: NodeId, min: f64, max: f64) -> NodeId {
        self.push(Expr::Clamp { input, min, max })
    }

    pub fn where_set(&mut self, input: NodeId, cond: NodeId, value: f64) -> NodeId {
        self.push(Expr::Where { input, cond, value })
    }

    pub fn connected_pixel_count(&mut self, input: NodeId, max_size: u64, connectivity: Connectivity) -> NodeId {
        self.push(Expr::ConnectedPixelCount { input, max_size, connectivity })
    }

    /// Cells of components with at least `min_size` cells
    pub fn patch_filter(&mut self, input: NodeId, min_size: u64, connectivity: Connectivity) -> NodeId {
        self.push(Expr::PatchFilter { input, min_size, connectivity })
    }

    pub fn dilate(&mut self, input: NodeId, radius_px: u32) -> NodeId {
        self.push(Expr::Dilate { input, radius_px })
    }

    pub fn resample(&mut self, input: NodeId, grid: GridSpec, method: Resampling) -> NodeId {
        self.push(Expr::Resample { input, grid, method })
    }
}

/// Materialises graph nodes with memoisation
pub struct Evaluator<'a> {
    graph: &'a Graph,
    sources: BTreeMap<String, Arc<Raster>>,
    cache: Vec<Option<Arc<Raster>>>,
    reprojector: &'a dyn Reprojector,
    max_pixels: u64,
}

impl<'a> Evaluator<'a> {
    pub fn new(graph: &'a Graph, reprojector: &'a dyn Reprojector, max_pixels: u64) -> Self {
        Self {
            graph,
            sources: BTreeMap::new(),
            cache: vec![None; graph.len()],
            reprojector,
            max_pixels,
        }
    }

    pub fn bind(&mut self, name: &str, raster: Raster) -> &mut Self {
        self.sources.insert(name.to_string(), Arc::new(raster));
        self
    }

    /// Number of nodes computed so far
    pub fn computed(&self) -> usize {
        self.cache.iter().filter(|c| c.is_some()).count()
    }

    pub fn evaluate(&mut self, id: NodeId) -> SclResult<Arc<Raster>> {
        if let Some(Some(done)) = self.cache.get(id.0) {
            return Ok(Arc::clone(done));
        }
        let expr = self
            .graph
            .expr(id)
            .ok_or_else(|| SclError::Processing(format!("unknown graph node {}", id.0)))?
            .clone();

        let raster = match expr {
            Expr::Source(name) => {
                let bound = self
                    .sources
                    .get(&name)
                    .map(Arc::clone)
                    .ok_or_else(|| SclError::Processing(format!("source '{}' is not bound", name)))?;
                return Ok(self.store(id, bound));
            }
            Expr::Constant { value, grid } => Raster::filled(grid, value),
            Expr::Affine { input, scale, offset } => self.evaluate(input)?.map(|v| v * scale + offset),
            Expr::Arith { op, lhs, rhs } => {
                let (a, b) = (self.evaluate(lhs)?, self.evaluate(rhs)?);
                a.zip_with(&b, |x, y| op.apply(x, y))?.masking_non_finite()
            }
            Expr::Compare { input, op, value } => self.evaluate(input)?.compare(op, value),
            Expr::CompareRaster { op, lhs, rhs } => {
                let (a, b) = (self.evaluate(lhs)?, self.evaluate(rhs)?);
                a.compare_raster(op, &b)?
            }
            Expr::SelfMask(input) => self.evaluate(input)?.self_mask(),
            Expr::UpdateMask { input, mask } => {
                let (a, m) = (self.evaluate(input)?, self.evaluate(mask)?);
                a.update_mask(&m)?
            }
            Expr::Unmask { input, fill } => self.evaluate(input)?.unmask(fill),
            Expr::Remap { input, table } => self.evaluate(input)?.remap(&table),
            Expr::Clamp { input, min, max } => self.evaluate(input)?.clamp(min, max),
            Expr::Where { input, cond, value } => {
                let (a, c) = (self.evaluate(input)?, self.evaluate(cond)?);
                a.where_set(&c, value)?
            }
            Expr::ConnectedPixelCount { input, max_size, connectivity } => {
                let a = self.evaluate(input)?;
                connected_pixel_count(&a, max_size, connectivity, self.max_pixels)?
            }
            Expr::PatchFilter { input, min_size, connectivity } => {
                let a = self.evaluate(input)?;
                PatchFilter::new(PatchFilterParams {
                    min_size,
                    connectivity,
                    max_pixels: self.max_pixels,
                })
                .filter(&a)?
            }
            Expr::Dilate { input, radius_px } => {
                let a = self.evaluate(input)?;
                dilate(&a, radius_px)
            }
            Expr::Resample { input, grid, method } => {
                let a = self.evaluate(input)?;
                self.reprojector.reproject(&a, &grid, method)?
            }
        };
        Ok(self.store(id, Arc::new(raster)))
    }

    fn store(&mut self, id: NodeId, raster: Arc<Raster>) -> Arc<Raster> {
        self.cache[id.0] = Some(Arc::clone(&raster));
        raster
    }
}
