/// 双线人流计数器 - 图形界面
///
/// 主线程: macroquad 事件循环 + egui 控制面板, 按显示节拍从槽位取帧
/// 生产者线程: 由 SessionController 在 start 时创建
///
/// 快捷键: Tab 显示/隐藏控制面板
use clap::Parser;
use egui_macroquad::egui;
use macroquad::prelude::*;
use people_counter_rs::event_log::LogRecord;
use people_counter_rs::pipeline::{AnnotatedFrame, Consumer, FrameSink};
use people_counter_rs::transmit::{MailRequest, OutboxTransport};
use people_counter_rs::{Args, SessionController};
use std::path::PathBuf;
use std::time::Instant;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn window_conf() -> Conf {
    Conf {
        window_title: "People Counter".to_owned(),
        window_width: 1100,
        window_height: 850,
        high_dpi: true,
        ..Default::default()
    }
}

/// 显示端: 标注帧上传到GPU纹理
#[derive(Default)]
struct TextureView {
    texture: Option<Texture2D>,
}

impl TextureView {
    fn upload(&mut self, bytes: &[u8], width: u32, height: u32) {
        // 只在分辨率变化时重建纹理
        let needs_rebuild = match &self.texture {
            Some(tex) => tex.width() != width as f32 || tex.height() != height as f32,
            None => true,
        };
        if needs_rebuild {
            let texture = Texture2D::from_rgba8(width as u16, height as u16, bytes);
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(tex) = &self.texture {
            tex.update(&Image {
                bytes: bytes.to_vec(),
                width: width as u16,
                height: height as u16,
            });
        }
    }
}

impl FrameSink for TextureView {
    fn show(&mut self, frame: &AnnotatedFrame) -> anyhow::Result<()> {
        self.upload(frame.image.as_raw(), frame.image.width(), frame.image.height());
        Ok(())
    }
}

struct CounterApp {
    session: SessionController,
    consumer: Consumer,
    view: TextureView,
    last_tick: Instant,
    preview_dirty: bool,

    entry_x: i32,
    exit_x: i32,
    status: String,
    show_control_panel: bool,

    show_log: bool,
    records: Vec<LogRecord>,
    export_path: String,

    show_email: bool,
    sender: String,
    password: String,
    recipient: String,
    outbox: OutboxTransport,
}

impl CounterApp {
    fn new(session: SessionController) -> Self {
        let lines = session.lines();
        let consumer = session.consumer();
        let export_path = session.config().export_file_name.clone();
        let outbox = OutboxTransport::new(&session.config().outbox_dir);
        Self {
            session,
            consumer,
            view: TextureView::default(),
            last_tick: Instant::now(),
            preview_dirty: true,
            entry_x: lines.entry_x,
            exit_x: lines.exit_x,
            status: "就绪".to_string(),
            show_control_panel: true,
            show_log: false,
            records: Vec::new(),
            export_path,
            show_email: false,
            sender: String::new(),
            password: String::new(),
            recipient: String::new(),
            outbox,
        }
    }

    fn start(&mut self) {
        match self.session.start() {
            Ok(()) => self.status = "▶️ 计数中".to_string(),
            Err(e) => self.status = format!("❌ {}", e),
        }
        // 采集宽度可能改变了计数线范围
        let lines = self.session.lines();
        self.entry_x = lines.entry_x;
        self.exit_x = lines.exit_x;
    }

    fn stop(&mut self) {
        if let Err(e) = self.session.stop() {
            self.status = format!("❌ {}", e);
            return;
        }
        self.status = "⏹️ 已停止".to_string();
        self.preview_dirty = true;
    }

    fn refresh_log(&mut self) {
        match self.session.read_log() {
            Ok(records) => self.records = records,
            Err(e) => self.status = format!("❌ 读取日志失败: {}", e),
        }
    }

    fn update(&mut self) {
        if self.session.is_running() {
            if self.last_tick.elapsed() >= self.consumer.period() {
                self.last_tick = Instant::now();
                self.consumer.step(&mut self.view);
            }
        } else if self.preview_dirty {
            let preview = self.session.idle_preview();
            self.view
                .upload(preview.as_raw(), preview.width(), preview.height());
            self.preview_dirty = false;
        }
    }

    fn draw(&self) {
        clear_background(BLACK);

        // 等比缩放居中显示
        if let Some(texture) = &self.view.texture {
            let scale = (screen_width() / texture.width()).min(screen_height() / texture.height());
            let w = texture.width() * scale;
            let h = texture.height() * scale;
            draw_texture_ex(
                texture,
                (screen_width() - w) / 2.0,
                (screen_height() - h) / 2.0,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(w, h)),
                    ..Default::default()
                },
            );
        }
    }

    fn draw_egui(&mut self) {
        let mut start_clicked = false;
        let mut stop_clicked = false;
        let mut view_log_clicked = false;

        egui_macroquad::ui(|egui_ctx| {
            if self.show_control_panel {
                egui::Window::new("控制面板")
                    .default_pos(egui::pos2(10.0, 10.0))
                    .default_size(egui::vec2(320.0, 420.0))
                    .resizable(true)
                    .show(egui_ctx, |ui| {
                        // --- 运行控制 ---
                        let running = self.session.is_running();
                        ui.horizontal(|ui| {
                            if ui.add_enabled(!running, egui::Button::new("▶️ 开始")).clicked() {
                                start_clicked = true;
                            }
                            if ui.add_enabled(running, egui::Button::new("⏹️ 停止")).clicked() {
                                stop_clicked = true;
                            }
                        });
                        ui.label(self.status.as_str());

                        ui.separator();

                        // --- 计数 ---
                        let counters = self.session.counters();
                        ui.horizontal(|ui| {
                            ui.label("进入:");
                            ui.colored_label(egui::Color32::GREEN, counters.entries.to_string());
                            ui.label("| 离开:");
                            ui.colored_label(egui::Color32::RED, counters.exits.to_string());
                        });

                        ui.separator();

                        // --- 计数线 ---
                        let max_x = self.session.frame_size().0 as i32;
                        if ui
                            .add(egui::Slider::new(&mut self.entry_x, 0..=max_x).text("进入线"))
                            .changed()
                        {
                            self.session.set_entry_line(self.entry_x);
                            self.preview_dirty = true;
                        }
                        if ui
                            .add(egui::Slider::new(&mut self.exit_x, 0..=max_x).text("离开线"))
                            .changed()
                        {
                            self.session.set_exit_line(self.exit_x);
                            self.preview_dirty = true;
                        }

                        ui.separator();

                        // --- 日志 ---
                        ui.horizontal(|ui| {
                            if ui.button("📋 查看日志").clicked() {
                                view_log_clicked = true;
                            }
                            if ui.button("📧 发送邮件").clicked() {
                                self.show_email = true;
                            }
                        });
                        ui.horizontal(|ui| {
                            ui.add(
                                egui::TextEdit::singleline(&mut self.export_path)
                                    .desired_width(200.0),
                            );
                            if ui.button("💾 导出").clicked() {
                                let dest = PathBuf::from(self.export_path.trim());
                                self.status = match self.session.export(&dest) {
                                    Ok(_) => format!("✅ 已导出到 {}", dest.display()),
                                    Err(e) => format!("❌ 导出失败: {}", e),
                                };
                            }
                        });
                    });
            }

            if self.show_log {
                let mut open = true;
                egui::Window::new("事件日志")
                    .open(&mut open)
                    .default_pos(egui::pos2(350.0, 10.0))
                    .default_size(egui::vec2(520.0, 400.0))
                    .show(egui_ctx, |ui| {
                        if ui.button("🔄 刷新").clicked() {
                            view_log_clicked = true;
                        }
                        egui::ScrollArea::vertical().show(ui, |ui| {
                            egui::Grid::new("log_grid").striped(true).show(ui, |ui| {
                                ui.strong("ID");
                                ui.strong("事件");
                                ui.strong("时间");
                                ui.strong("时长");
                                ui.end_row();
                                for record in &self.records {
                                    ui.label(record.id.as_str());
                                    ui.label(record.event.as_str());
                                    ui.label(record.timestamp.as_str());
                                    ui.label(record.display_duration());
                                    ui.end_row();
                                }
                            });
                        });
                    });
                self.show_log = open;
            }

            if self.show_email {
                let mut open = true;
                let mut send_clicked = false;
                egui::Window::new("发送日志")
                    .open(&mut open)
                    .default_pos(egui::pos2(350.0, 420.0))
                    .resizable(false)
                    .show(egui_ctx, |ui| {
                        egui::Grid::new("email_grid").show(ui, |ui| {
                            ui.label("发件邮箱:");
                            ui.text_edit_singleline(&mut self.sender);
                            ui.end_row();
                            ui.label("应用密码:");
                            ui.add(egui::TextEdit::singleline(&mut self.password).password(true));
                            ui.end_row();
                            ui.label("收件邮箱:");
                            ui.text_edit_singleline(&mut self.recipient);
                            ui.end_row();
                        });
                        if ui.button("📧 发送").clicked() {
                            send_clicked = true;
                        }
                    });
                if send_clicked {
                    let request = MailRequest::new(&self.sender, &self.password, &self.recipient);
                    match self.session.transmit(&request, &self.outbox) {
                        Ok(()) => {
                            self.status = "✅ 邮件已提交".to_string();
                            self.password.clear();
                            open = false;
                        }
                        Err(e) => self.status = format!("❌ 发送失败: {}", e),
                    }
                }
                self.show_email = open;
            }
        });

        egui_macroquad::draw();

        if start_clicked {
            self.start();
        }
        if stop_clicked {
            self.stop();
        }
        if view_log_clicked {
            self.show_log = true;
            self.refresh_log();
        }
    }

    fn handle_input(&mut self) {
        if is_key_pressed(KeyCode::Tab) {
            self.show_control_panel = !self.show_control_panel;
        }
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.load_config();
    config.print_summary();

    let session = match args
        .capture_source(&config)
        .and_then(|source| Ok((source, args.detector()?)))
    {
        Ok((source, detector)) => SessionController::new(config, source, detector),
        Err(e) => {
            log::error!("❌ 初始化失败: {:#}", e);
            return;
        }
    };

    let mut app = CounterApp::new(session);
    prevent_quit();

    loop {
        if is_quit_requested() {
            app.stop();
            break;
        }
        app.handle_input();
        app.update();
        app.draw();
        app.draw_egui();
        next_frame().await;
    }
}
