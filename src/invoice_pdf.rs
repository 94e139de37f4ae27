//! PDF invoices for subscription customers.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::{Date, Duration};

use crate::config::Config;
use crate::error::StoreError;
use crate::model::{Customer, Invoice, InvoiceStatus, Subscription};
use crate::period::{compute_period, BillingPeriod};
use crate::repository::{InvoiceBuilder, Repository};

/// Everything printed on one invoice.
#[derive(Debug, Clone)]
pub struct InvoicePdfPayload {
    pub invoice_number: u32,
    pub customer_number: u32,
    pub customer_name: String,
    pub address_lines: Vec<String>,
    pub is_company: bool,
    pub created_date: Date,
    pub due_date: Date,
    pub period: Option<BillingPeriod>,
    pub subscriptions: Vec<Subscription>,
}

/// Writes `<invoice_dir>/<year>/invoice-<number>.pdf` under the data directory.
pub struct PdfInvoiceBuilder {
    issue_date: Date,
    period_length_months: u8,
    invoice_dir_name: String,
    font_path: Option<PathBuf>,
}

impl PdfInvoiceBuilder {
    pub fn new(config: &Config, issue_date: Date) -> Self {
        Self {
            issue_date,
            period_length_months: config.period_length_months,
            invoice_dir_name: config.invoice_dir_name.clone(),
            font_path: config.invoice_font_path.clone(),
        }
    }

    fn load_font(&self, data_dir: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(path) = &self.font_path else {
            return Ok(None);
        };
        let path = data_dir.join(path);
        std::fs::read(&path)
            .map(Some)
            .map_err(|e| StoreError::io(&path, e))
    }
}

impl InvoiceBuilder for PdfInvoiceBuilder {
    fn build(
        &self,
        repo: &Repository,
        customer: &Customer,
        due_days: u32,
        use_next_period: bool,
    ) -> Result<Invoice, StoreError> {
        // Everything that can fail on input goes before the number is consumed.
        let period = if customer.subscriptions.is_empty() {
            None
        } else {
            Some(compute_period(
                self.issue_date,
                self.period_length_months,
                use_next_period,
            )?)
        };
        let due_date = self
            .issue_date
            .checked_add(Duration::days(i64::from(due_days)))
            .ok_or_else(|| StoreError::Render(format!("due date overflows ({due_days} days)")))?;
        let font = self.load_font(&repo.paths().data_dir)?;

        let invoice_number = repo.new_invoice_number()?;
        let relative_file_path = format!(
            "{}/{}/invoice-{}.pdf",
            self.invoice_dir_name,
            self.issue_date.year(),
            invoice_number
        );

        let payload = InvoicePdfPayload {
            invoice_number,
            customer_number: customer.customer_number,
            customer_name: customer.display_name().to_string(),
            address_lines: address_lines(customer),
            is_company: customer.info.is_company,
            created_date: self.issue_date,
            due_date,
            period,
            subscriptions: customer.subscriptions.clone(),
        };
        let bytes = generate_pdf_bytes(&payload, font.as_deref())?;
        write_artifact(&repo.paths().data_dir.join(&relative_file_path), &bytes)?;

        Ok(Invoice {
            invoice_number,
            status: InvoiceStatus::New,
            created_date: self.issue_date,
            due_date,
            period_start_date: period.map(|p| p.start_day),
            relative_file_path,
        })
    }
}

fn address_lines(customer: &Customer) -> Vec<String> {
    let info = &customer.info;
    let city_line = format!("{} {}", info.postal_code.trim(), info.city.trim());
    [info.address.trim(), city_line.trim(), info.email.trim(), info.phone.trim()]
        .into_iter()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| StoreError::io(path, e))
}

fn format_date(d: Date) -> Result<String, StoreError> {
    d.format(format_description!("[day].[month].[year]"))
        .map_err(|e| StoreError::Render(e.to_string()))
}

/// Text for the built-in fonts, which only cover WinAnsi. Known accented letters lose
/// their accent; anything else becomes `?`.
fn winansi_text(text: &str) -> Cow<'_, str> {
    if text.chars().all(is_winansi) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if is_winansi(ch) {
            out.push(ch);
        } else {
            out.push_str(fold_letter(ch).unwrap_or("?"));
        }
    }
    Cow::Owned(out)
}

fn is_winansi(ch: char) -> bool {
    matches!(ch, '\u{20}'..='\u{7e}' | '\u{a0}'..='\u{ff}')
        || "€‚ƒ„…†‡ˆ‰Š‹ŒŽ‘’“”•–—˜™š›œžŸ".contains(ch)
}

fn fold_letter(ch: char) -> Option<&'static str> {
    Some(match ch {
        'č' | 'ć' => "c",
        'Č' | 'Ć' => "C",
        'đ' => "dj",
        'Đ' => "Dj",
        'ď' => "d",
        'Ď' => "D",
        'ě' | 'ę' | 'ė' => "e",
        'Ě' | 'Ę' | 'Ė' => "E",
        'ğ' => "g",
        'Ğ' => "G",
        'ı' => "i",
        'İ' => "I",
        'ł' => "l",
        'Ł' => "L",
        'ń' | 'ň' => "n",
        'Ń' | 'Ň' => "N",
        'ő' => "o",
        'Ő' => "O",
        'ř' => "r",
        'Ř' => "R",
        'ś' | 'ş' | 'ș' => "s",
        'Ś' | 'Ş' | 'Ș' => "S",
        'ť' | 'ţ' | 'ț' => "t",
        'Ť' | 'Ţ' | 'Ț' => "T",
        'ů' | 'ű' => "u",
        'Ů' | 'Ű' => "U",
        'ą' | 'ă' => "a",
        'Ą' | 'Ă' => "A",
        'ź' | 'ż' => "z",
        'Ź' | 'Ż' => "Z",
        _ => return None,
    })
}

fn push_line(
    layer: &printpdf::PdfLayerReference,
    font: &printpdf::IndirectFontRef,
    text: &str,
    font_size: f32,
    x: f32,
    y: f32,
) {
    use printpdf::Mm;
    layer.use_text(text, font_size, Mm(x), Mm(y), font);
}

fn draw_rule(layer: &printpdf::PdfLayerReference, x1: f32, x2: f32, y: f32) {
    use printpdf::Mm;
    layer.add_line(printpdf::Line {
        points: vec![
            (printpdf::Point::new(Mm(x1), Mm(y)), false),
            (printpdf::Point::new(Mm(x2), Mm(y)), false),
        ],
        is_closed: false,
    });
}

/// Render one invoice. `font` is a TrueType file embedded for all text; without it the
/// built-in Helvetica is used.
pub fn generate_pdf_bytes(
    payload: &InvoicePdfPayload,
    font: Option<&[u8]>,
) -> Result<Vec<u8>, StoreError> {
    use printpdf::{BuiltinFont, Mm, PdfDocument};

    const PAGE_W: f32 = 210.0;
    const PAGE_H: f32 = 297.0;
    const MARGIN_X: f32 = 20.0;
    const LINE_GAP: f32 = 6.0;

    let title = format!("Invoice {}", payload.invoice_number);
    let (doc, page1, layer1) = PdfDocument::new(&title, Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
    let layer = doc.get_page(page1).get_layer(layer1);

    let embedded = font.is_some();
    let (font, font_bold) = match font {
        Some(bytes) => {
            let font = doc
                .add_external_font(std::io::Cursor::new(bytes))
                .map_err(|e| StoreError::Render(e.to_string()))?;
            (font.clone(), font)
        }
        None => (
            doc.add_builtin_font(BuiltinFont::Helvetica)
                .map_err(|e| StoreError::Render(e.to_string()))?,
            doc.add_builtin_font(BuiltinFont::HelveticaBold)
                .map_err(|e| StoreError::Render(e.to_string()))?,
        ),
    };
    let fit = |text: &str| -> String {
        if embedded {
            text.to_string()
        } else {
            winansi_text(text).into_owned()
        }
    };

    let mut y = PAGE_H - 25.0;
    push_line(&layer, &font_bold, &title, 18.0, MARGIN_X, y);
    y -= LINE_GAP * 2.0;

    push_line(&layer, &font_bold, &fit(&payload.customer_name), 11.0, MARGIN_X, y);
    y -= LINE_GAP;
    for line in &payload.address_lines {
        push_line(&layer, &font, &fit(line), 10.0, MARGIN_X, y);
        y -= LINE_GAP;
    }
    let customer_label = if payload.is_company { "Company no." } else { "Customer no." };
    push_line(
        &layer,
        &font,
        &format!("{customer_label} {}", payload.customer_number),
        10.0,
        MARGIN_X,
        y,
    );
    y -= LINE_GAP * 1.5;
    draw_rule(&layer, MARGIN_X, PAGE_W - MARGIN_X, y);
    y -= LINE_GAP * 1.5;

    let rows = [
        ("Invoice date", format_date(payload.created_date)?),
        ("Due date", format_date(payload.due_date)?),
        (
            "Period",
            match payload.period {
                Some(p) => format!("{} - {}", format_date(p.start_day)?, format_date(p.end_day)?),
                None => "No subscriptions".to_string(),
            },
        ),
    ];
    for (label, value) in rows {
        push_line(&layer, &font_bold, label, 10.0, MARGIN_X, y);
        push_line(&layer, &font, &value, 10.0, MARGIN_X + 40.0, y);
        y -= LINE_GAP;
    }

    if !payload.subscriptions.is_empty() {
        y -= LINE_GAP;
        push_line(&layer, &font_bold, "Subscriptions", 11.0, MARGIN_X, y);
        y -= LINE_GAP;
        for s in &payload.subscriptions {
            let weekday = s.weekday.as_str();
            let line = format!(
                "Track {}, {}{} {:02}:{:02}",
                s.track_number,
                &weekday[..1],
                weekday[1..].to_ascii_lowercase(),
                s.start_time.hour(),
                s.start_time.minute()
            );
            push_line(&layer, &font, &line, 10.0, MARGIN_X + 4.0, y);
            y -= LINE_GAP;
        }
    }

    let mut writer = std::io::BufWriter::new(Vec::<u8>::new());
    doc.save(&mut writer)
        .map_err(|e| StoreError::Render(e.to_string()))?;
    writer
        .into_inner()
        .map_err(|e| StoreError::Render(e.to_string()))
}
