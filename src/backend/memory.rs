// Memory type selection
//
// Every buffer and image gets its own vk::DeviceMemory allocation. This is the
// single place that decides which heap type it comes from.

use ash::vk;

use crate::error::FatalError;

/// Lowest memory type index that is allowed by `type_bits` and whose property
/// flags contain all of `required`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, FatalError> {
    memory_properties
        .memory_types_as_slice()
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or(FatalError::NoCompatibleMemoryType {
            type_bits,
            required,
        })
}

/// Allocate memory for `requirements` and return it unbound
pub fn allocate(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> anyhow::Result<vk::DeviceMemory> {
    let memory_type_index =
        find_memory_type(memory_properties, requirements.memory_type_bits, properties)?;

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    log::trace!(
        "Allocating {} bytes from memory type {}",
        requirements.size,
        memory_type_index
    );

    unsafe { device.allocate_memory(&alloc_info, None) }.map_err(|result| {
        FatalError::Vulkan {
            call: "vkAllocateMemory",
            result,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST_VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;

    fn table(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            *slot = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        props
    }

    // Brute-force reference for the property check below
    fn expected(types: &[vk::MemoryPropertyFlags], bits: u32, required: vk::MemoryPropertyFlags) -> Option<u32> {
        (0..types.len() as u32).find(|&i| bits & (1 << i) != 0 && types[i as usize].contains(required))
    }

    #[test]
    fn picks_lowest_matching_index_for_every_request() {
        let types = [
            DEVICE_LOCAL,
            HOST_VISIBLE | HOST_COHERENT,
            DEVICE_LOCAL | HOST_VISIBLE | HOST_COHERENT,
            HOST_VISIBLE | HOST_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
        ];
        let props = table(&types);
        let requests = [
            DEVICE_LOCAL,
            HOST_VISIBLE,
            HOST_VISIBLE | HOST_COHERENT,
            DEVICE_LOCAL | HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::empty(),
        ];

        for bits in 0u32..16 {
            for &required in &requests {
                let got = find_memory_type(&props, bits, required).ok();
                assert_eq!(
                    got,
                    expected(&types, bits, required),
                    "bits {:#06b}, flags {:?}",
                    bits,
                    required
                );
            }
        }
    }

    #[test]
    fn superset_match_skips_lower_partial_matches() {
        let props = table(&[HOST_VISIBLE, HOST_VISIBLE | HOST_COHERENT]);
        assert_eq!(
            find_memory_type(&props, 0b11, HOST_VISIBLE | HOST_COHERENT).unwrap(),
            1
        );
    }

    #[test]
    fn type_bits_outside_table_are_ignored() {
        let props = table(&[DEVICE_LOCAL]);
        assert!(find_memory_type(&props, 0b10, DEVICE_LOCAL).is_err());
    }

    #[test]
    fn no_match_reports_failure() {
        let props = table(&[DEVICE_LOCAL, DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b11, HOST_VISIBLE).unwrap_err();
        assert!(matches!(
            err,
            FatalError::NoCompatibleMemoryType { type_bits: 0b11, .. }
        ));
    }
}
