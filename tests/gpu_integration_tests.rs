//! End-to-end tests against a real Vulkan device
//!
//! All tests require a GPU and a display and are marked with #[ignore].
//!
//! Run with: cargo test --test gpu_integration_tests -- --ignored

use ash::vk;
use glam::Mat4;
use vkforge::backend::buffer::GpuBuffer;
use vkforge::render::{FramePhase, Material, Mesh};
use vkforge::{Config, Renderer};
use winit::event_loop::EventLoop;
use winit::window::Window;

/// Helper to create a test window for Vulkan
#[allow(deprecated)]
fn create_test_window() -> (Window, EventLoop<()>) {
    let event_loop = EventLoop::new().unwrap();
    let window_attrs = Window::default_attributes()
        .with_title("vkforge test")
        .with_inner_size(winit::dpi::PhysicalSize::new(640, 480));
    let window = event_loop.create_window(window_attrs).unwrap();
    (window, event_loop)
}

fn create_renderer(window: &Window) -> Renderer {
    let mut config = Config::default();
    config.graphics.allow_integrated_gpu = true;
    let size = window.inner_size();
    Renderer::new(window, size.width, size.height, &config).unwrap()
}

// ============================================================================
// FRAME LOOP
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_cube_into_offscreen_targets_cycles_frame_ring() {
    let (window, _event_loop) = create_test_window();
    let mut renderer = create_renderer(&window);
    assert_eq!(renderer.frames_in_flight(), 2);

    let color = renderer.create_color_target(512, 512).unwrap();
    let depth = renderer.create_depth_target(512, 512).unwrap();
    let camera = renderer.create_camera();
    {
        let mut camera = camera.borrow_mut();
        camera.set_color_target(color.clone());
        camera.set_depth_target(Some(depth.clone()));
        camera.look_at(glam::Vec3::new(0.0, 0.0, 3.0), glam::Vec3::ZERO, glam::Vec3::Y);
        camera.set_perspective(60f32.to_radians(), 1.0, 0.1, 100.0);
    }
    renderer.set_camera(camera);
    renderer.reset_material();

    let cube = Mesh::unit_cube(renderer.device()).unwrap();
    assert_eq!(cube.index_count(), 36);

    let mut seen = Vec::new();
    for frame in 0..3 {
        assert_eq!(renderer.frame_phase(), FramePhase::Idle);
        seen.push(renderer.current_frame_index());

        assert!(renderer.begin_frame().unwrap(), "frame {} was skipped", frame);
        renderer.clear_screen([0.0, 0.0, 0.0, 1.0]).unwrap();
        renderer
            .draw_mesh(&cube, Mat4::from_rotation_y(frame as f32 * 0.5))
            .unwrap();
        renderer.end_frame().unwrap();
    }

    assert_eq!(seen, vec![0, 1, 0]);
    assert_eq!(color.layout(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    assert_eq!(depth.layout(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
}

#[test]
#[ignore] // Requires GPU
fn test_draw_outside_frame_is_rejected() {
    let (window, _event_loop) = create_test_window();
    let mut renderer = create_renderer(&window);
    let cube = Mesh::unit_cube(renderer.device()).unwrap();

    assert!(renderer.draw_mesh(&cube, Mat4::IDENTITY).is_err());
    assert!(renderer.end_frame().is_err());
    assert_eq!(renderer.frame_phase(), FramePhase::Idle);
}

// ============================================================================
// RESOURCES
// ============================================================================

#[test]
#[ignore] // Requires GPU
fn test_buffer_keeps_handle_while_size_matches() {
    let (window, _event_loop) = create_test_window();
    let renderer = create_renderer(&window);

    let mut buffer = GpuBuffer::uniform(renderer.device().clone());
    assert_eq!(buffer.handle(), vk::Buffer::null());

    buffer.copy_to_gpu(&[1u8; 64]).unwrap();
    let first = buffer.handle();
    let first_memory = buffer.memory();
    assert_ne!(first, vk::Buffer::null());

    buffer.copy_to_gpu(&[2u8; 64]).unwrap();
    assert_eq!(buffer.handle(), first);
    assert_eq!(buffer.memory(), first_memory);
    assert_eq!(buffer.size(), Some(64));

    buffer.copy_to_gpu(&[3u8; 128]).unwrap();
    assert_eq!(buffer.size(), Some(128));
    assert_ne!(buffer.handle(), first);
    assert_ne!(buffer.memory(), first_memory);
}

#[test]
#[ignore] // Requires GPU
fn test_device_local_buffer_gets_new_handles_on_resize() {
    let (window, _event_loop) = create_test_window();
    let renderer = create_renderer(&window);

    let mut buffer = GpuBuffer::vertex(renderer.device().clone());
    buffer.copy_to_gpu(&[0u8; 96]).unwrap();
    let (first, first_memory) = (buffer.handle(), buffer.memory());

    buffer.copy_to_gpu(&[0u8; 96]).unwrap();
    assert_eq!(buffer.handle(), first);

    buffer.copy_to_gpu(&[0u8; 48]).unwrap();
    assert_ne!(buffer.handle(), first);
    assert_ne!(buffer.memory(), first_memory);
    assert_eq!(buffer.size(), Some(48));
}

#[test]
#[ignore] // Requires GPU
fn test_texture_layouts_after_creation() {
    let (window, _event_loop) = create_test_window();
    let renderer = create_renderer(&window);

    let target = renderer.create_color_target(512, 512).unwrap();
    assert_eq!(target.layout(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    assert_eq!(target.extent(), vk::Extent2D { width: 512, height: 512 });

    let image = image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 255]));
    let texture = renderer.create_texture_from_image(&image).unwrap();
    assert_eq!(texture.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert!(texture.descriptor_info().is_some());
}

#[test]
#[ignore] // Requires GPU
fn test_material_assets_load_and_cache() {
    let (window, _event_loop) = create_test_window();
    let mut renderer = create_renderer(&window);

    let first = renderer
        .create_or_get_material("assets/materials/checker.material")
        .unwrap();
    let second = renderer
        .create_or_get_material("assets/materials/checker.material")
        .unwrap();
    assert!(std::rc::Rc::ptr_eq(&first, &second));
    assert!(first.texture(0).is_some());
}

#[test]
#[ignore] // Requires GPU
fn test_material_texture_slots_back_fill_with_none() {
    let (window, _event_loop) = create_test_window();
    let renderer = create_renderer(&window);

    let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 255, 0, 255]));
    let texture = renderer.create_texture_from_image(&image).unwrap();

    let mut material = Material::clone(renderer.default_material());
    assert!(material.textures().is_empty());

    material.set_texture(2, texture.clone());
    assert_eq!(material.textures().len(), 3);
    assert!(material.texture(0).is_none());
    assert!(material.texture(1).is_none());
    assert!(std::rc::Rc::ptr_eq(material.texture(2).unwrap(), &texture));

    // Filling an earlier slot leaves the later one alone
    material.set_texture(0, texture.clone());
    assert_eq!(material.textures().len(), 3);
    assert!(material.texture(0).is_some());
    assert!(material.texture(1).is_none());
}
