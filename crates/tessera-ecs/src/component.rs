//! Component type registration and metadata.
//!
//! Components are entities. Registering a Rust type creates (or reuses) an
//! entity for it and records the layout, constructor and drop glue needed to
//! store values of that type in type-erased table columns. Zero-sized types
//! register as tags and never get a column.

use std::{alloc::Layout, any::TypeId, fmt};

use rustc_hash::FxHashMap;

use crate::id::{Entity, Id};

/// Marker trait for types that can be used as components.
///
/// Types must be safe to move in memory (no self-referential pointers) and
/// default-constructible, since adding a component id without a value
/// constructs it in place.
pub trait Component: Default + Send + Sync + 'static {}

// Blanket implementation for all suitable types
impl<T: Default + Send + Sync + 'static> Component for T {}

/// Runtime information about a component type.
#[derive(Clone)]
pub struct ComponentInfo {
    /// Type name for debugging.
    name: &'static str,
    /// Memory layout of the component.
    layout: Layout,
    /// Writes a default value to uninitialized memory.
    ctor: unsafe fn(*mut u8),
    /// Function to drop a component in place.
    drop_fn: Option<unsafe fn(*mut u8)>,
    /// Rust TypeId for type checking.
    type_id: TypeId,
}

impl ComponentInfo {
    /// Create component info for a concrete type.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            layout: Layout::new::<T>(),
            ctor: |ptr| unsafe { ptr.cast::<T>().write(T::default()) },
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr| unsafe { std::ptr::drop_in_place(ptr.cast::<T>()) })
            } else {
                None
            },
            type_id: TypeId::of::<T>(),
        }
    }

    /// Get the component type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Get the memory layout.
    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Get the size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.size()
    }

    /// Get the alignment requirement.
    #[must_use]
    pub const fn align(&self) -> usize {
        self.layout.align()
    }

    /// Zero-sized components are stored as tags.
    #[must_use]
    pub const fn is_tag(&self) -> bool {
        self.layout.size() == 0
    }

    /// Check if the component needs drop.
    #[must_use]
    pub const fn needs_drop(&self) -> bool {
        self.drop_fn.is_some()
    }

    /// Construct a default value at the given pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of this component type and must not
    /// hold an initialized value that still needs dropping.
    pub unsafe fn construct(&self, ptr: *mut u8) {
        unsafe { (self.ctor)(ptr) };
    }

    /// Drop a component at the given pointer.
    ///
    /// # Safety
    ///
    /// - `ptr` must point to a valid, initialized instance of this component type.
    /// - The memory at `ptr` must not be accessed after this call.
    pub unsafe fn drop_in_place(&self, ptr: *mut u8) {
        if let Some(drop_fn) = self.drop_fn {
            unsafe { drop_fn(ptr) };
        }
    }

    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Check if this info is for the given type.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

/// Registry for component types.
///
/// Maps Rust types to the entities that represent them and stores the
/// metadata of each. Owned by a single world.
#[derive(Default)]
pub struct ComponentRegistry {
    /// Map from TypeId to component entity.
    type_to_entity: FxHashMap<TypeId, Entity>,
    /// Component info keyed by component entity index.
    infos: FxHashMap<u32, ComponentInfo>,
}

impl ComponentRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `T` with `entity`.
    ///
    /// If the type is already registered, returns the existing entity and
    /// leaves `entity` untouched.
    pub fn register<T: Component>(&mut self, entity: Entity) -> Entity {
        let type_id = TypeId::of::<T>();

        if let Some(&existing) = self.type_to_entity.get(&type_id) {
            return existing;
        }

        self.type_to_entity.insert(type_id, entity);
        self.infos.insert(entity.index(), ComponentInfo::of::<T>());

        entity
    }

    /// Get the component entity for a type, if registered.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<Entity> {
        self.type_to_entity.get(&TypeId::of::<T>()).copied()
    }

    /// Get component info for an entity.
    #[must_use]
    pub fn info(&self, entity: Entity) -> Option<&ComponentInfo> {
        self.infos.get(&entity.index())
    }

    /// Type info for the data stored under `id`, if any.
    ///
    /// A pair takes the type of its relation if the relation is a component,
    /// otherwise the type of its target. Tags store nothing.
    #[must_use]
    pub fn data_info(&self, id: Id) -> Option<&ComponentInfo> {
        let data = |entity: Entity| self.info(entity).filter(|info| !info.is_tag());
        match id {
            Id::Entity(entity) => data(entity),
            Id::Pair { relation, target } => data(relation).or_else(|| data(target)),
        }
    }

    /// Forget the type registered on `entity`.
    pub fn unregister(&mut self, entity: Entity) {
        if self.infos.remove(&entity.index()).is_some() {
            self.type_to_entity
                .retain(|_, registered| registered.index() != entity.index());
        }
    }

    /// Get the number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.type_to_entity.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.type_to_entity.is_empty()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("count", &self.len())
            .finish()
    }
}
