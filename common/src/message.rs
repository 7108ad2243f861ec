// Outbound message formatting

use crate::config::MessageConfig;
use crate::models::{Candidate, MarkupFormat};
use serde::{Deserialize, Serialize};

/// A formatted promotion ready for a channel publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub markup: MarkupFormat,
}

/// Builds message bodies in a fixed order: hook, name, price block,
/// call to action, link. Sections are separated by blank lines.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    config: MessageConfig,
}

impl MessageFormatter {
    pub fn new(config: MessageConfig) -> Self {
        Self { config }
    }

    pub fn format(
        &self,
        candidate: &Candidate,
        hook: Option<&str>,
        markup: MarkupFormat,
    ) -> OutboundMessage {
        let mut sections: Vec<String> = Vec::with_capacity(5);

        if let Some(hook) = hook.map(str::trim).filter(|h| !h.is_empty()) {
            sections.push(escape(hook, markup));
        }
        sections.push(escape(&candidate.name, markup));
        sections.push(self.price_block(candidate, markup));
        sections.push(escape(&self.config.call_to_action, markup));
        sections.push(escape(&candidate.link, markup));

        OutboundMessage {
            title: candidate.name.clone(),
            body: sections.join("\n\n"),
            image_url: candidate.image_url.clone(),
            markup,
        }
    }

    fn price_block(&self, candidate: &Candidate, markup: MarkupFormat) -> String {
        let now = format_price(candidate.price, &self.config.currency_symbol);

        match candidate.discounted_from() {
            Some(original) => {
                let from = format_price(original, &self.config.currency_symbol);
                format!(
                    "{} {} {} {}",
                    escape(&self.config.from_label, markup),
                    strike(&escape(&from, markup), markup),
                    escape(&self.config.now_label, markup),
                    escape(&now, markup)
                )
            }
            None => escape(&now, markup),
        }
    }
}

fn strike(text: &str, markup: MarkupFormat) -> String {
    match markup {
        MarkupFormat::Html => format!("<s>{}</s>", text),
        MarkupFormat::WhatsApp => format!("~{}~", text),
        MarkupFormat::Plain => text.to_string(),
    }
}

fn escape(text: &str, markup: MarkupFormat) -> String {
    match markup {
        MarkupFormat::Html => text
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
        MarkupFormat::WhatsApp | MarkupFormat::Plain => text.to_string(),
    }
}

/// `1299.9` -> `R$ 1.299,90`
pub fn format_price(value: f64, currency_symbol: &str) -> String {
    let cents = (value * 100.0).round() as i64;
    let negative = cents < 0;
    let cents = cents.unsigned_abs();
    let units = (cents / 100).to_string();
    let fraction = cents % 100;

    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, digit) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    format!(
        "{}{} {},{:02}",
        if negative { "-" } else { "" },
        currency_symbol,
        grouped,
        fraction
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(price: f64, original_price: Option<f64>) -> Candidate {
        Candidate {
            item_id: "1".to_string(),
            name: "Fone Bluetooth TWS".to_string(),
            price,
            original_price,
            link: "https://s.shopee.com.br/abc".to_string(),
            rating: Some(4.8),
            image_url: Some("https://img/1.jpg".to_string()),
            category: None,
            subcategory: None,
            inferred_category: None,
            commission: 1.0,
            score: 0.5,
        }
    }

    fn formatter() -> MessageFormatter {
        MessageFormatter::new(MessageConfig::default())
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(79.9, "R$"), "R$ 79,90");
        assert_eq!(format_price(1299.9, "R$"), "R$ 1.299,90");
        assert_eq!(format_price(1234567.891, "R$"), "R$ 1.234.567,89");
        assert_eq!(format_price(0.5, "R$"), "R$ 0,50");
    }

    #[test]
    fn test_format_price_saturates_out_of_range_values() {
        assert_eq!(format_price(-2.5, "R$"), "-R$ 2,50");
        assert_eq!(format_price(-1e300, "R$"), "-R$ 92.233.720.368.547.758,08");
        assert_eq!(format_price(f64::MAX, "R$"), "R$ 92.233.720.368.547.758,07");
    }

    #[test]
    fn test_sections_in_order_with_hook() {
        let message = formatter().format(
            &candidate(79.9, Some(129.9)),
            Some("Oferta imperdível!"),
            MarkupFormat::Html,
        );

        let sections: Vec<&str> = message.body.split("\n\n").collect();
        assert_eq!(sections.len(), 5);
        assert_eq!(sections[0], "Oferta imperdível!");
        assert_eq!(sections[1], "Fone Bluetooth TWS");
        assert_eq!(sections[2], "De <s>R$ 129,90</s> por R$ 79,90");
        assert_eq!(sections[3], MessageConfig::default().call_to_action);
        assert_eq!(sections[4], "https://s.shopee.com.br/abc");
        assert_eq!(message.title, "Fone Bluetooth TWS");
        assert_eq!(message.image_url.as_deref(), Some("https://img/1.jpg"));
    }

    #[test]
    fn test_hook_section_omitted_without_copy() {
        let message = formatter().format(&candidate(79.9, None), None, MarkupFormat::Plain);

        let sections: Vec<&str> = message.body.split("\n\n").collect();
        assert_eq!(sections.len(), 4);
        assert_eq!(sections[0], "Fone Bluetooth TWS");
        assert_eq!(sections[1], "R$ 79,90");
    }

    #[test]
    fn test_original_price_not_higher_renders_price_alone() {
        let message = formatter().format(&candidate(79.9, Some(79.9)), None, MarkupFormat::Html);
        assert!(!message.body.contains("<s>"));
    }

    #[test]
    fn test_whatsapp_strike_through() {
        let message = formatter().format(&candidate(10.0, Some(20.0)), None, MarkupFormat::WhatsApp);
        assert!(message.body.contains("De ~R$ 20,00~ por R$ 10,00"));
    }

    #[test]
    fn test_html_escaping() {
        let mut item = candidate(10.0, None);
        item.name = "Cabo <USB> & carregador".to_string();
        let message = formatter().format(&item, None, MarkupFormat::Html);

        assert!(message.body.contains("Cabo &lt;USB&gt; &amp; carregador"));
        assert_eq!(message.title, "Cabo <USB> & carregador");
    }
}
