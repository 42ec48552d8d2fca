#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque handle to a collision material in a [`MaterialRegistry`].
///
/// Solvers only store the handle of each particle; resolving it is up to the
/// collision backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaterialHandle(pub u32);

/// Surface response used when particles touch colliders.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionMaterial {
    pub dynamic_friction: f32,
    pub static_friction: f32,
    pub stickiness: f32,
    pub stick_distance: f32,
}

impl CollisionMaterial {
    /// Cotton-like fabric: moderate friction, no sticking.
    pub const FABRIC: Self = Self {
        dynamic_friction: 0.3,
        static_friction: 0.4,
        stickiness: 0.0,
        stick_distance: 0.0,
    };

    /// Rubberized surface: high friction.
    pub const RUBBER: Self = Self {
        dynamic_friction: 0.9,
        static_friction: 1.0,
        stickiness: 0.0,
        stick_distance: 0.0,
    };

    /// Nearly frictionless.
    pub const SILK: Self = Self {
        dynamic_friction: 0.02,
        static_friction: 0.05,
        stickiness: 0.0,
        stick_distance: 0.0,
    };

    /// Sticks to colliders within a small distance.
    pub const ADHESIVE: Self = Self {
        dynamic_friction: 0.5,
        static_friction: 0.6,
        stickiness: 0.8,
        stick_distance: 0.02,
    };
}

impl Default for CollisionMaterial {
    fn default() -> Self {
        Self::FABRIC
    }
}

/// Collision materials owned by the host, addressed by handle.
#[derive(Clone, Debug, Default)]
pub struct MaterialRegistry {
    materials: Vec<CollisionMaterial>,
}

impl MaterialRegistry {
    pub fn register(&mut self, material: CollisionMaterial) -> MaterialHandle {
        self.materials.push(material);
        MaterialHandle(self.materials.len() as u32 - 1)
    }

    pub fn get(&self, handle: MaterialHandle) -> Option<&CollisionMaterial> {
        self.materials.get(handle.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_presets_valid() {
        for (name, preset) in [
            ("fabric", CollisionMaterial::FABRIC),
            ("rubber", CollisionMaterial::RUBBER),
            ("silk", CollisionMaterial::SILK),
            ("adhesive", CollisionMaterial::ADHESIVE),
        ] {
            assert!(
                preset.static_friction >= preset.dynamic_friction,
                "{} static friction must not be below dynamic friction",
                name
            );
            assert!(
                (0.0..=1.0).contains(&preset.stickiness),
                "{} stickiness must be in [0, 1]",
                name
            );
        }
    }

    #[test]
    fn test_registry_handles() {
        let mut registry = MaterialRegistry::default();
        let rubber = registry.register(CollisionMaterial::RUBBER);
        let silk = registry.register(CollisionMaterial::SILK);
        assert_ne!(rubber, silk);
        assert_eq!(registry.get(silk), Some(&CollisionMaterial::SILK));
        assert_eq!(registry.get(MaterialHandle(9)), None);
    }
}
