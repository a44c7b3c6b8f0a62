// src/gui.rs
use anyhow::Result;
use eframe::egui;
use egui::{Color32, RichText, ScrollArea, Stroke, Ui, Vec2};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

#[cfg(feature = "clipboard")]
use arboard::Clipboard;

use crate::ai::{AiConnector, GeminiModel, DIAGNOSIS_PROMPT, GENERIC_FAILURE_MESSAGE};
use crate::capture::{CameraManager, CapturedImage};
use crate::config::Config;
use crate::session::{complete_analysis, AnalysisState, Session};

const WINDOW_WIDTH: f32 = 720.0;
const WINDOW_HEIGHT: f32 = 860.0;
const PREVIEW_MAX_SIDE: u32 = 1024;
const ACCENT: Color32 = Color32::from_rgb(42, 90, 170);
const PANEL_FILL: Color32 = Color32::from_rgb(35, 35, 35);

#[derive(Default)]
struct CaptureStatus {
    capturing: bool,
    error: Option<String>,
}

enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

pub struct ToothSnapApp {
    was_style_initialized: bool,

    camera: Arc<CameraManager>,
    connector: Option<Arc<dyn AiConnector>>,
    startup_error: Option<String>,
    session: Arc<Mutex<Session>>,
    capture_status: Arc<Mutex<CaptureStatus>>,
    preview: Option<(u64, egui::TextureHandle)>,
}

impl ToothSnapApp {
    fn new(camera: CameraManager, connector: std::result::Result<Arc<dyn AiConnector>, String>) -> Self {
        let (connector, startup_error) = match connector {
            Ok(c) => (Some(c), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            was_style_initialized: false,
            camera: Arc::new(camera),
            connector,
            startup_error,
            session: Arc::new(Mutex::new(Session::new())),
            capture_status: Arc::new(Mutex::new(CaptureStatus::default())),
            preview: None,
        }
    }
}

impl eframe::App for ToothSnapApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.was_style_initialized {
            let mut style = (*ctx.style()).clone();
            style.visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(30, 30, 30);
            style.visuals.widgets.inactive.bg_fill = Color32::from_rgb(45, 45, 45);
            style.visuals.widgets.hovered.bg_fill = Color32::from_rgb(55, 55, 55);
            style.visuals.widgets.active.bg_fill = Color32::from_rgb(65, 65, 65);
            style.visuals.widgets.inactive.rounding = egui::Rounding::same(6.0);
            style.visuals.widgets.hovered.rounding = egui::Rounding::same(6.0);
            style.visuals.widgets.active.rounding = egui::Rounding::same(6.0);
            style.visuals.selection.bg_fill = ACCENT;
            style.text_styles.insert(
                egui::TextStyle::Body,
                egui::FontId::new(15.0, egui::FontFamily::Proportional)
            );
            style.text_styles.insert(
                egui::TextStyle::Button,
                egui::FontId::new(15.0, egui::FontFamily::Proportional)
            );
            style.text_styles.insert(
                egui::TextStyle::Heading,
                egui::FontId::new(22.0, egui::FontFamily::Proportional)
            );
            ctx.set_style(style);
            self.was_style_initialized = true;
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ScrollArea::vertical()
                .auto_shrink([false; 2])
                .show(ui, |ui| {
                    self.draw_header(ui);

                    if let Some(message) = &self.startup_error {
                        draw_notice(ui, NoticeKind::Error, message);
                        return;
                    }

                    self.draw_capture_section(ui, ctx);
                    ui.add_space(12.0);
                    self.draw_analysis_section(ui, ctx);

                    ui.add_space(16.0);
                    ui.separator();
                    ui.label(RichText::new("Powered by Google Gemini AI").small().color(Color32::GRAY));
                });
        });
    }
}

impl ToothSnapApp {
    fn draw_header(&self, ui: &mut Ui) {
        ui.add_space(10.0);
        ui.heading(RichText::new("🦷 Dental AI Analyzer: Teeth Condition Diagnosis").size(22.0));
        ui.add_space(6.0);
        ui.label("Capture an image of your teeth using your webcam. Gemini AI will then analyze the image \
            to provide a preliminary diagnosis of their condition.");
        ui.add_space(4.0);
        ui.label(
            RichText::new("Disclaimer: This tool is for informational purposes only and should not replace professional medical advice.")
                .strong(),
        );
        ui.separator();
    }

    fn draw_capture_section(&mut self, ui: &mut Ui, ctx: &egui::Context) {
        ui.heading(RichText::new("1. Capture Your Teeth Image").size(18.0));
        ui.add_space(6.0);

        let (capturing, capture_error) = {
            let status = self.capture_status.lock().unwrap();
            (status.capturing, status.error.clone())
        };
        let requesting = self.session.lock().unwrap().is_requesting();
        let can_capture = !capturing && !requesting;

        ui.horizontal(|ui| {
            let button_size = egui::vec2(ui.available_width() * 0.5 - 4.0, 36.0);
            if ui.add_enabled(can_capture, egui::Button::new(
                RichText::new("📷 Take Photo").size(14.0))
                .fill(Color32::from_rgb(45, 45, 45))
                .rounding(8.0)
                .min_size(button_size)
            ).clicked() {
                self.capture_from_camera(ctx);
            }
            if ui.add_enabled(can_capture, egui::Button::new(
                RichText::new("🖼 Open Image...").size(14.0))
                .fill(Color32::from_rgb(45, 45, 45))
                .rounding(8.0)
                .min_size(button_size)
            ).clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .add_filter("Images", &["jpg", "jpeg", "png", "webp", "bmp"])
                    .pick_file()
                {
                    self.capture_from_file(path);
                }
            }
        });

        let has_image = self.session.lock().unwrap().image().is_some();
        if has_image && can_capture && ui.small_button("🗑 Clear Image").clicked() {
            self.session.lock().unwrap().clear();
            self.capture_status.lock().unwrap().error = None;
        }

        if capturing {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(format!("Capturing from camera {}...", self.camera.index()));
            });
        }
        if let Some(message) = capture_error {
            ui.add_space(4.0);
            draw_notice(ui, NoticeKind::Warning, &message);
        }

        self.refresh_preview(ctx);
        if let Some((_, texture)) = &self.preview {
            ui.add_space(8.0);
            let available_width = ui.available_width();
            let aspect_ratio = texture.size_vec2().x / texture.size_vec2().y;
            let image_height = if aspect_ratio > 0.0 { available_width / aspect_ratio } else { available_width };
            ui.image((texture.id(), Vec2::new(available_width, image_height)));
            ui.label(RichText::new("Captured Image").small().color(Color32::GRAY));
        }
    }

    fn draw_analysis_section(&mut self, ui: &mut Ui, ctx: &egui::Context) {
        let (state, has_image, can_analyze) = {
            let session = self.session.lock().unwrap();
            (session.state().clone(), session.image().is_some(), session.can_analyze())
        };

        if !has_image {
            draw_notice(ui, NoticeKind::Info, "Please use the camera above to capture an image of your teeth for analysis.");
            return;
        }

        ui.heading(RichText::new("2. Get AI Diagnosis").size(18.0));
        ui.add_space(6.0);

        if state == AnalysisState::Requesting {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label("Analyzing image with AI... This may take a moment...");
            });
        } else if ui.add_enabled(can_analyze, egui::Button::new(
            RichText::new("🤖 Analyze Teeth Condition").size(14.0))
            .fill(ACCENT)
            .rounding(4.0)
            .min_size(egui::vec2(220.0, 32.0))
        ).clicked() {
            self.analyze_image(ctx);
        }

        ui.add_space(8.0);
        match state {
            AnalysisState::Succeeded { diagnosis, completed_at } => {
                draw_notice(ui, NoticeKind::Success, "Analysis Complete!");
                ui.separator();
                ui.heading(RichText::new("AI Diagnosis:").size(18.0));
                egui::Frame::none()
                    .fill(PANEL_FILL)
                    .rounding(8.0)
                    .inner_margin(12.0)
                    .show(ui, |ui| {
                        ui.set_width(ui.available_width());
                        ui.label(RichText::new(&diagnosis).color(Color32::WHITE));
                    });
                ui.horizontal(|ui| {
                    ui.label(
                        RichText::new(format!("Analyzed at {}", completed_at.format("%H:%M:%S")))
                            .small()
                            .color(Color32::from_rgb(130, 130, 130)),
                    );
                    if ui.small_button("📋 Copy Diagnosis").clicked() {
                        self.copy_diagnosis_to_clipboard(&diagnosis);
                    }
                });
            }
            AnalysisState::Failed => draw_notice(ui, NoticeKind::Error, GENERIC_FAILURE_MESSAGE),
            AnalysisState::Idle | AnalysisState::Requesting => {}
        }
    }

    fn refresh_preview(&mut self, ctx: &egui::Context) {
        let (seq, image) = {
            let session = self.session.lock().unwrap();
            (session.capture_seq(), session.image().cloned())
        };
        let Some(image) = image else {
            self.preview = None;
            return;
        };
        if matches!(&self.preview, Some((loaded, _)) if *loaded == seq) {
            return;
        }

        let preview = image.preview(PREVIEW_MAX_SIDE);
        let size = [preview.width() as usize, preview.height() as usize];
        let egui_image = egui::ColorImage::from_rgba_unmultiplied(
            size,
            preview.to_rgba8().as_flat_samples().as_slice(),
        );
        let texture = ctx.load_texture("captured_image", egui_image, egui::TextureOptions::LINEAR);
        self.preview = Some((seq, texture));
        info!("Preview texture loaded for image #{}", seq);
    }

    fn capture_from_camera(&mut self, ctx: &egui::Context) {
        {
            let mut status = self.capture_status.lock().unwrap();
            status.capturing = true;
            status.error = None;
        }
        let camera = Arc::clone(&self.camera);
        let session = Arc::clone(&self.session);
        let status = Arc::clone(&self.capture_status);
        let ctx = ctx.clone();
        thread::spawn(move || {
            let outcome = camera.capture_still();
            let mut status = status.lock().unwrap();
            status.capturing = false;
            match outcome {
                Ok(image) => {
                    if !session.lock().unwrap().capture(image) {
                        status.error = Some("Capture ignored while an analysis is running.".to_string());
                    }
                }
                Err(e) => {
                    error!("Failed to capture from camera: {:#}", e);
                    status.error = Some(format!("Camera capture failed: {}", e));
                }
            }
            ctx.request_repaint();
        });
    }

    fn capture_from_file(&mut self, path: PathBuf) {
        let outcome = CapturedImage::from_file(&path);
        let mut status = self.capture_status.lock().unwrap();
        match outcome {
            Ok(image) => {
                status.error = None;
                if !self.session.lock().unwrap().capture(image) {
                    status.error = Some("Capture ignored while an analysis is running.".to_string());
                }
            }
            Err(e) => {
                error!("Failed to load image {}: {:#}", path.display(), e);
                status.error = Some(format!("Could not open {}: {}", path.display(), e));
            }
        }
    }

    fn analyze_image(&mut self, ctx: &egui::Context) {
        let Some(connector) = self.connector.clone() else {
            warn!("Analyze pressed without a model");
            return;
        };
        // Requesting is entered here on the UI thread; the worker only finishes it.
        let Some(image) = self.session.lock().unwrap().begin_analysis() else {
            info!("No image data to analyze.");
            return;
        };
        info!("Starting AI analysis for image.");
        let session = Arc::clone(&self.session);
        let ctx = ctx.clone();
        thread::spawn(move || {
            complete_analysis(&session, &*connector, &image, DIAGNOSIS_PROMPT);
            ctx.request_repaint();
        });
    }

    fn copy_diagnosis_to_clipboard(&self, text: &str) {
        #[cfg(feature = "clipboard")]
        {
            match Clipboard::new() {
                Ok(mut clipboard) => {
                    if let Err(e) = clipboard.set_text(text.to_string()) {
                        error!("Failed to copy diagnosis to clipboard: {}", e);
                    } else {
                        info!("Diagnosis copied to clipboard");
                    }
                }
                Err(e) => {
                    error!("Failed to access clipboard: {}", e);
                }
            }
        }
        #[cfg(not(feature = "clipboard"))]
        {
            let _ = text;
            error!("Clipboard feature not enabled. Enable the 'clipboard' feature in Cargo.toml");
        }
    }
}

fn draw_notice(ui: &mut Ui, kind: NoticeKind, text: &str) {
    let (fill, stroke) = match kind {
        NoticeKind::Info => (Color32::from_rgb(28, 45, 70), Color32::from_rgb(70, 110, 170)),
        NoticeKind::Success => (Color32::from_rgb(25, 60, 35), Color32::from_rgb(70, 150, 90)),
        NoticeKind::Warning => (Color32::from_rgb(70, 60, 20), Color32::from_rgb(170, 140, 50)),
        NoticeKind::Error => (Color32::from_rgb(75, 30, 30), Color32::from_rgb(180, 70, 70)),
    };
    egui::Frame::none()
        .fill(fill)
        .stroke(Stroke::new(1.0, stroke))
        .rounding(8.0)
        .inner_margin(egui::Margin::symmetric(12.0, 8.0))
        .show(ui, |ui| {
            ui.set_width(ui.available_width());
            ui.label(RichText::new(text).color(Color32::WHITE));
        });
}

pub fn run_gui(config: Arc<Config>) -> Result<()> {
    info!("ToothSnap GUI starting up...");

    let connector: std::result::Result<Arc<dyn AiConnector>, String> = match GeminiModel::new(Arc::clone(&config)) {
        Ok(model) => Ok(Arc::new(model)),
        Err(e) => {
            error!("Error loading Gemini model: {}", e);
            Err(format!("Error loading Gemini model. Please check your API key and model name. Details: {}", e))
        }
    };
    let camera = CameraManager::new(config.camera_index);

    let native_options = eframe::NativeOptions {
        initial_window_size: Some(egui::vec2(WINDOW_WIDTH, WINDOW_HEIGHT)),
        min_window_size: Some(egui::vec2(480.0, 480.0)),
        ..eframe::NativeOptions::default()
    };

    eframe::run_native(
        "Dental AI Analyzer",
        native_options,
        Box::new(move |_cc| {
            Box::new(ToothSnapApp::new(camera, connector))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to start GUI: {}", e))?;

    Ok(())
}
