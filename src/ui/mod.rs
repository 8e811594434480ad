use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use gpui::{
    AnyElement, App, AppContext, Context, FocusHandle, InteractiveElement, IntoElement,
    KeyDownEvent, ObjectFit, ParentElement, Render, RenderImage, Styled, StyledImage,
    TitlebarOptions, Window, WindowOptions, div, img, px,
};
use gpui_component::Root;

use crate::{
    display::WindowEndpoint,
    types::{AnnotatedFrame, OverlayText},
};

mod render_util;

pub const WINDOW_TITLE: &str = "Emotion Recognition - Press 'q' to Exit";

/// Text height, in logical pixels, at overlay scale 1.0.
const OVERLAY_FONT_PX: f32 = 30.0;

pub fn launch_ui(app: &mut App, endpoint: WindowEndpoint) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some(WINDOW_TITLE.into()),
            appears_transparent: false,
            traffic_light_position: None,
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|cx| AppView::new(endpoint, cx));
        let focus = view.read(app).focus_handle.clone();
        window.focus(&focus);
        app.new(|cx| Root::new(view, window, cx))
    })?;

    // Closing the window drops the view and with it the capture link.
    app.on_window_closed(|cx| {
        if cx.windows().is_empty() {
            cx.quit();
        }
    })
    .detach();

    Ok(())
}

struct AppView {
    frame_rx: Receiver<AnnotatedFrame>,
    key_tx: Sender<char>,
    focus_handle: FocusHandle,
    latest_image: Option<Arc<RenderImage>>,
    latest_overlay: Option<OverlayText>,
}

impl AppView {
    fn new(endpoint: WindowEndpoint, cx: &mut Context<'_, Self>) -> Self {
        Self {
            frame_rx: endpoint.frame_rx,
            key_tx: endpoint.key_tx,
            focus_handle: cx.focus_handle(),
            latest_image: None,
            latest_overlay: None,
        }
    }

    /// Takes whatever the capture loop has shown since the last render.
    /// Returns false once the capture side has hung up.
    fn drain_frames(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) -> bool {
        loop {
            match self.frame_rx.try_recv() {
                Ok(annotated) => {
                    if let Some(image) = render_util::frame_to_image(&annotated.frame) {
                        self.replace_latest_image(image, window, cx);
                    }
                    self.latest_overlay = Some(annotated.overlay);
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn replace_latest_image(
        &mut self,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        if let Some(old_image) = self.latest_image.replace(new_image) {
            // Release the previous texture or the sprite atlas keeps every frame.
            cx.drop_image(old_image, Some(window));
        }
    }

    fn on_key_down(&mut self, event: &KeyDownEvent, _: &mut Window, _: &mut Context<'_, Self>) {
        let mut chars = event.keystroke.key.chars();
        if let (Some(key), None) = (chars.next(), chars.next()) {
            // The capture side may already be gone; nothing to do then.
            let _ = self.key_tx.try_send(key);
        }
    }
}

fn render_overlay(overlay: &OverlayText) -> AnyElement {
    let [r, g, b] = overlay.color;
    let font_px = OVERLAY_FONT_PX * overlay.scale;
    // The origin is the text baseline, as in the frame's pixel space.
    div()
        .absolute()
        .left(px(overlay.origin.0))
        .top(px((overlay.origin.1 - font_px).max(0.0)))
        .text_size(px(font_px))
        .text_color(gpui::rgb(u32::from_be_bytes([0, r, g, b])))
        .whitespace_nowrap()
        .child(overlay.text.clone())
        .into_any_element()
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        if !self.drain_frames(window, cx) {
            log::info!("capture session ended, closing window");
            cx.quit();
        }

        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        let mut shell = div()
            .relative()
            .size_full()
            .bg(gpui::rgb(0x000000))
            .track_focus(&self.focus_handle)
            .on_key_down(cx.listener(Self::on_key_down));

        if let Some(image) = &self.latest_image {
            shell = shell.child(img(image.clone()).size_full().object_fit(ObjectFit::Contain));
        }
        if let Some(overlay) = &self.latest_overlay {
            shell = shell.child(render_overlay(overlay));
        }
        shell
    }
}
