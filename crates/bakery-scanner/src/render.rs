use clap::ValueEnum;

use bakery_plugin_db::Plugin;
use bakery_project::Project;

/// Which derived list of a project to print.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum View {
    #[default]
    All,
    Active,
    Visible,
}

fn render_plugin(plugin: &Plugin) -> String {
    match plugin.link_target() {
        Some(target) => format!(
            "{:>6}  {} -> {}\n",
            plugin.level, plugin.short_path, target.short_path
        ),
        None => format!("{:>6}  {}\n", plugin.level, plugin.short_path),
    }
}

/// One line per plugin: level, short path and, for links, the resolved target.
pub fn render_project(project: &Project, view: View) -> String {
    let plugins = match view {
        View::All => project.all_plugins().to_vec(),
        View::Active => project.active_plugins(),
        View::Visible => project.visible_plugins(),
    };
    let mut out = format!("[{}] {} plugins\n", project.name(), plugins.len());
    for plugin in &plugins {
        out.push_str(&render_plugin(plugin));
    }
    out
}
