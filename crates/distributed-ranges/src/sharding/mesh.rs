use hashbrown::{HashMap, HashSet};
use thiserror::Error;

use crate::concepts::Owner;

/// Axis holding the rank of a resource.
pub const RANK_AXIS: &str = "rank";
/// Axis holding the device index of a resource.
pub const DEVICE_AXIS: &str = "device";

/// A named axis of a [`ResourceMesh`], e.g. `"rank"` or `"device"`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MeshAxis {
    /// A name that uniquely identifies the axis.
    name: String,
}

impl MeshAxis {
    /// Constructs a new [`MeshAxis`] with the given name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        MeshAxis { name: name.into() }
    }

    /// The axis name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The execution resources of a run, arranged on named axes.
///
/// A runtime with 2 ranks and 3 devices per rank is a mesh of shape `[2, 3]`
/// with axes `["rank", "device"]`. Resources are stored in row-major order,
/// which is also the order in which distributions hand out segments, so the
/// last axis varies fastest. Every resource sits at the coordinates given by
/// its rank and device.
#[derive(Clone, Debug)]
pub struct ResourceMesh {
    /// Resources in row-major order.
    resources: Vec<Owner>,
    /// Extent of every axis.
    shape: Vec<usize>,
    /// Maps axis names to their position in `shape`.
    axes: HashMap<MeshAxis, usize>,
}

impl ResourceMesh {
    /// Resources in row-major order.
    pub fn resources(&self) -> &[Owner] {
        &self.resources
    }

    /// Extent of every axis.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the mesh has no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Extent of the axis called `name`.
    pub fn extent(&self, name: &str) -> Option<usize> {
        self.axes
            .get(&MeshAxis::new(name))
            .map(|&idx| self.shape[idx])
    }
}

/// Errors raised while building a [`ResourceMesh`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// An axis was mapped to an invalid or already used position.
    #[error("invalid mesh axis: {0}")]
    InvalidAxis(String),
    /// The axes or resource count do not describe the shape.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),
    /// A resource appears more than once.
    #[error("{0} appears more than once in the mesh")]
    DuplicateResource(Owner),
    /// A resource is stored at coordinates that disagree with its rank or
    /// device.
    #[error("{owner} is stored at coordinates {coordinates:?}")]
    MisplacedResource {
        /// The misplaced resource.
        owner: Owner,
        /// Where it was found.
        coordinates: Vec<usize>,
    },
}

/// A builder for [`ResourceMesh`].
#[derive(Clone, Debug)]
pub struct ResourceMeshBuilder {
    resources: Vec<Owner>,
    shape: Vec<usize>,
    axes: HashMap<MeshAxis, usize>,
}

impl ResourceMeshBuilder {
    /// Starts a mesh over `resources` with the given shape.
    pub fn new<S: Into<Vec<usize>>>(resources: Vec<Owner>, shape: S) -> Self {
        Self {
            resources,
            shape: shape.into(),
            axes: HashMap::new(),
        }
    }

    /// Names the axis at position `idx` of the shape.
    ///
    /// ```rust
    /// use distributed_ranges::Owner;
    /// use distributed_ranges::sharding::{MeshAxis, ResourceMeshBuilder};
    ///
    /// let owners = (0..2)
    ///     .flat_map(|r| (0..2).map(move |d| Owner::new(r, d)))
    ///     .collect();
    /// let mesh = ResourceMeshBuilder::new(owners, [2, 2])
    ///     .with_axis(0, MeshAxis::new("rank"))
    ///     .with_axis(1, MeshAxis::new("device"))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(mesh.extent("device"), Some(2));
    /// ```
    pub fn with_axis(mut self, idx: usize, axis: MeshAxis) -> Self {
        self.axes.insert(axis, idx);
        self
    }

    fn axis(&self, name: &str) -> Result<usize, MeshError> {
        self.axes
            .get(&MeshAxis::new(name))
            .copied()
            .ok_or_else(|| MeshError::InvalidMesh(format!("no {name:?} axis")))
    }

    /// Validates the axes and the placement of every resource and builds the
    /// mesh.
    pub fn build(self) -> Result<ResourceMesh, MeshError> {
        let ndim = self.shape.len();
        let mut mapped = HashSet::new();
        for &idx in self.axes.values() {
            if idx >= ndim {
                return Err(MeshError::InvalidAxis(format!(
                    "position {idx} is outside shape {:?}",
                    self.shape
                )));
            }
            if !mapped.insert(idx) {
                return Err(MeshError::InvalidAxis(format!("position {idx} named twice")));
            }
        }
        if mapped.len() != ndim {
            return Err(MeshError::InvalidMesh(format!(
                "{} of {ndim} axes are named",
                mapped.len()
            )));
        }
        let rank_axis = self.axis(RANK_AXIS)?;
        let device_axis = self.axis(DEVICE_AXIS)?;

        let expected = self.shape.iter().product::<usize>();
        if self.resources.len() != expected {
            return Err(MeshError::InvalidMesh(format!(
                "{} resources for shape {:?}",
                self.resources.len(),
                self.shape,
            )));
        }

        let mut seen = HashSet::with_capacity(self.resources.len());
        for (pos, &owner) in self.resources.iter().enumerate() {
            if !seen.insert(owner) {
                return Err(MeshError::DuplicateResource(owner));
            }
            let coordinates = unravel(pos, &self.shape);
            if coordinates[rank_axis] != owner.rank || coordinates[device_axis] != owner.device {
                return Err(MeshError::MisplacedResource { owner, coordinates });
            }
        }

        Ok(ResourceMesh {
            resources: self.resources,
            shape: self.shape,
            axes: self.axes,
        })
    }
}

/// Row-major coordinates of position `pos` in `shape`.
fn unravel(mut pos: usize, shape: &[usize]) -> Vec<usize> {
    let mut coordinates = vec![0; shape.len()];
    for (coord, &extent) in coordinates.iter_mut().zip(shape).rev() {
        *coord = pos % extent;
        pos /= extent;
    }
    coordinates
}
