// Two-column CSV export. Names are written verbatim: no quoting, no escaping.
use crate::core::item::Item;

pub const CSV_HEADER: &str = "Item Name,Quantity";

pub fn export_csv(items: &[Item]) -> String {
    let mut lines = Vec::with_capacity(items.len() + 1);
    lines.push(CSV_HEADER.to_string());
    lines.extend(
        items
            .iter()
            .map(|item| format!("{},{}", item.name, item.quantity)),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::export_csv;
    use crate::core::item::Item;

    #[test]
    fn exports_header_and_rows_in_order() {
        let items = vec![Item::new("A", 2), Item::new("B", 5)];
        assert_eq!(export_csv(&items), "Item Name,Quantity\nA,2\nB,5");
    }

    #[test]
    fn empty_export_is_header_only() {
        assert_eq!(export_csv(&[]), "Item Name,Quantity");
    }

    #[test]
    fn embedded_commas_are_not_escaped() {
        let items = vec![Item::new("Nuts, bolts", 4)];
        assert_eq!(export_csv(&items), "Item Name,Quantity\nNuts, bolts,4");
    }
}
