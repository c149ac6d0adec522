//! Vertex format of the background quad.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Position, color and texture coordinate.
///
/// Memory layout: position at 0, color at 12, tex_coord at 24, 32 bytes in
/// total. Shader locations follow field order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl QuadVertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: 24,
            },
        ]
    }
}

/// Fullscreen quad drawn just in front of the far plane.
pub const BACKGROUND_QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex::new(
        Vec3::new(-1.0, 1.0, 0.99),
        Vec3::new(1.0, 0.0, 0.0),
        Vec2::new(1.0, 0.0),
    ),
    QuadVertex::new(
        Vec3::new(1.0, 1.0, 0.99),
        Vec3::new(0.0, 1.0, 0.0),
        Vec2::new(0.0, 0.0),
    ),
    QuadVertex::new(
        Vec3::new(1.0, -1.0, 0.99),
        Vec3::new(0.0, 0.0, 1.0),
        Vec2::new(0.0, 1.0),
    ),
    QuadVertex::new(
        Vec3::new(-1.0, -1.0, 0.99),
        Vec3::new(1.0, 1.0, 1.0),
        Vec2::new(1.0, 1.0),
    ),
];

pub const BACKGROUND_QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_vertex_layout() {
        assert_eq!(std::mem::size_of::<QuadVertex>(), 32);
        assert_eq!(std::mem::offset_of!(QuadVertex, color), 12);
        assert_eq!(std::mem::offset_of!(QuadVertex, tex_coord), 24);

        let binding = QuadVertex::binding_description();
        assert_eq!(binding.stride, 32);
        let attributes = QuadVertex::attribute_descriptions();
        for (attribute, offset) in attributes.iter().zip([0, 12, 24]) {
            assert_eq!(attribute.offset, offset);
        }
    }

    #[test]
    fn test_background_quad_covers_clip_space() {
        for index in BACKGROUND_QUAD_INDICES {
            assert!((index as usize) < BACKGROUND_QUAD_VERTICES.len());
        }
        for vertex in BACKGROUND_QUAD_VERTICES {
            assert_eq!(vertex.position.x.abs(), 1.0);
            assert_eq!(vertex.position.y.abs(), 1.0);
            assert!(vertex.position.z < 1.0);
        }
        let bytes: &[u8] = bytemuck::cast_slice(&BACKGROUND_QUAD_VERTICES);
        assert_eq!(bytes.len(), 128);
    }
}
