//! Purpose: Render an inventory projection as a themed text table for terminals.
//! Exports: `render_table`, `display_name`, `page_footer`.
//! Role: Small, pure formatter used by the `list` command on a TTY.
//! Invariants: ANSI escapes appear only when explicitly enabled.
//! Invariants: Display capitalization never changes stored names.
use stocktake::api::{Projection, Theme};

// 8/16-color palette; the light theme avoids yellow/cyan that wash out on white.
struct Palette {
    header: &'static str,
    name: &'static str,
    quantity: &'static str,
    footer: &'static str,
}

const DARK: Palette = Palette {
    header: "1;36",
    name: "39",
    quantity: "33",
    footer: "90",
};

const LIGHT: Palette = Palette {
    header: "1;34",
    name: "30",
    quantity: "35",
    footer: "90",
};

fn palette(theme: Theme) -> &'static Palette {
    match theme {
        Theme::Dark => &DARK,
        Theme::Light => &LIGHT,
    }
}

pub fn display_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn page_footer(projection: &Projection) -> String {
    format!(
        "page {} of {} ({} matching, {} total)",
        projection.page,
        projection.page_count.max(1),
        projection.matched,
        projection.total
    )
}

pub fn render_table(projection: &Projection, theme: Theme, use_color: bool) -> String {
    let colors = palette(theme);
    let headers = ["Item Name", "Quantity"];
    let rows: Vec<[String; 2]> = projection
        .rows
        .iter()
        .map(|item| {
            [
                sanitize_cell(&display_name(&item.name)),
                item.quantity.to_string(),
            ]
        })
        .collect();

    let mut widths = headers.map(|header| header.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!(
        "{}  {}",
        paint(&pad_right(headers[0], widths[0]), colors.header, use_color),
        paint(&pad_left(headers[1], widths[1]), colors.header, use_color)
    ));
    if rows.is_empty() {
        lines.push(paint("(no items)", colors.footer, use_color));
    }
    for [name, quantity] in &rows {
        lines.push(format!(
            "{}  {}",
            paint(&pad_right(name, widths[0]), colors.name, use_color),
            paint(&pad_left(quantity, widths[1]), colors.quantity, use_color)
        ));
    }
    lines.push(paint(&page_footer(projection), colors.footer, use_color));
    lines.join("\n")
}

fn sanitize_cell(value: &str) -> String {
    value.replace('\n', "\\n").replace('\r', "\\r")
}

fn pad_right(cell: &str, width: usize) -> String {
    let len = cell.chars().count();
    format!("{cell}{}", " ".repeat(width.saturating_sub(len)))
}

fn pad_left(cell: &str, width: usize) -> String {
    let len = cell.chars().count();
    format!("{}{cell}", " ".repeat(width.saturating_sub(len)))
}

fn paint(text: &str, color: &str, use_color: bool) -> String {
    if !use_color {
        return text.to_string();
    }
    format!("\u{1b}[{color}m{text}\u{1b}[0m")
}

#[cfg(test)]
mod tests {
    use super::{display_name, page_footer, render_table};
    use stocktake::api::{Item, NameCollator, SortSpec, Theme, project};

    #[test]
    fn display_name_capitalizes_first_letter_only() {
        assert_eq!(display_name("widget stand"), "Widget stand");
        assert_eq!(display_name("éclair"), "Éclair");
        assert_eq!(display_name(""), "");
    }

    #[test]
    fn plain_table_aligns_columns_and_has_footer() {
        let items = vec![Item::new("apple", 12), Item::new("kiwi", 3)];
        let projection = project(&items, "", SortSpec::default(), 1, 10, &NameCollator::root());
        let table = render_table(&projection, Theme::Dark, false);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Item Name  Quantity");
        assert_eq!(lines[1], "Apple            12");
        assert_eq!(lines[2], "Kiwi              3");
        assert_eq!(lines[3], "page 1 of 1 (2 matching, 2 total)");
        assert!(!table.contains('\u{1b}'));
    }

    #[test]
    fn empty_projection_still_reports_one_page() {
        let projection = project(&[], "", SortSpec::default(), 1, 10, &NameCollator::root());
        assert_eq!(page_footer(&projection), "page 1 of 1 (0 matching, 0 total)");
        let table = render_table(&projection, Theme::Light, false);
        assert!(table.contains("(no items)"));
    }

    #[test]
    fn themes_use_different_header_colors() {
        let items = vec![Item::new("a", 1)];
        let projection = project(&items, "", SortSpec::default(), 1, 10, &NameCollator::root());
        let dark = render_table(&projection, Theme::Dark, true);
        let light = render_table(&projection, Theme::Light, true);
        assert!(dark.starts_with("\u{1b}[1;36m"));
        assert!(light.starts_with("\u{1b}[1;34m"));
    }
}
