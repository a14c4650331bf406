use crate::domain::models::CustomerProfile;

/// Placeholders understood by [`render_template`].
pub const PLACEHOLDERS: [&str; 5] = [
    "{first_name}",
    "{last_name}",
    "{phone}",
    "{location}",
    "{prefered_product}",
];

/// Substitutes every known placeholder in `template` with the customer's
/// value. Missing optional fields render as the empty string and unknown
/// placeholders are left untouched. Matching is exact and case-sensitive.
///
/// Substituted values are not scanned again, so a value that itself looks
/// like a placeholder is emitted as-is.
pub fn render_template(template: &str, customer: &CustomerProfile) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        rendered.push_str(&rest[..start]);
        let candidate = &rest[start..];

        match PLACEHOLDERS
            .iter()
            .find(|placeholder| candidate.starts_with(**placeholder))
        {
            Some(placeholder) => {
                rendered.push_str(value_for(placeholder, customer));
                rest = &candidate[placeholder.len()..];
            }
            None => {
                rendered.push('{');
                rest = &candidate[1..];
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

fn value_for<'a>(placeholder: &str, customer: &'a CustomerProfile) -> &'a str {
    match placeholder {
        "{first_name}" => &customer.first_name,
        "{last_name}" => &customer.last_name,
        "{phone}" => &customer.phone,
        "{location}" => customer.location.as_deref().unwrap_or_default(),
        "{prefered_product}" => customer.prefered_product.as_deref().unwrap_or_default(),
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> CustomerProfile {
        CustomerProfile {
            id: 1,
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            phone: "+254712345678".to_string(),
            location: Some("Nairobi".to_string()),
            prefered_product: Some("Premium".to_string()),
        }
    }

    #[test]
    fn replaces_all_fields() {
        let rendered = render_template(
            "Hi {first_name} {last_name} ({phone}) in {location}, try {prefered_product}",
            &customer(),
        );
        assert_eq!(
            rendered,
            "Hi John Doe (+254712345678) in Nairobi, try Premium"
        );
    }

    #[test]
    fn missing_optional_fields_render_empty() {
        let jane = CustomerProfile {
            first_name: "Jane".to_string(),
            last_name: "Smith".to_string(),
            location: None,
            prefered_product: None,
            ..customer()
        };
        assert_eq!(
            render_template("Hello {first_name} {last_name}! Location: {location}", &jane),
            "Hello Jane Smith! Location: "
        );
        let product = render_template("Product: {prefered_product}", &jane);
        assert_eq!(product, "Product: ");
        assert!(!product.contains("null"));
    }

    #[test]
    fn replaces_every_occurrence() {
        assert_eq!(
            render_template("{first_name}, {first_name}, {first_name}!", &customer()),
            "John, John, John!"
        );
    }

    #[test]
    fn leaves_unknown_and_miscased_placeholders() {
        assert_eq!(
            render_template("{First_Name} {nickname} {first_name", &customer()),
            "{First_Name} {nickname} {first_name"
        );
    }

    #[test]
    fn handles_braces_around_placeholders() {
        assert_eq!(render_template("{{first_name}}", &customer()), "{John}");
        assert_eq!(render_template("", &customer()), "");
        assert_eq!(render_template("no placeholders", &customer()), "no placeholders");
    }

    #[test]
    fn values_are_not_rescanned() {
        let tricky = CustomerProfile {
            first_name: "{last_name}".to_string(),
            ..customer()
        };
        assert_eq!(render_template("{first_name}", &tricky), "{last_name}");
    }

    #[test]
    fn special_characters_pass_through() {
        let obrien = CustomerProfile {
            first_name: "O'Brien".to_string(),
            last_name: "Smith-Jones".to_string(),
            location: Some("Nairobi (CBD)".to_string()),
            ..customer()
        };
        assert_eq!(
            render_template("Hello {first_name} {last_name} from {location}!", &obrien),
            "Hello O'Brien Smith-Jones from Nairobi (CBD)!"
        );
    }

    #[test]
    fn deterministic() {
        let template = "Hey {first_name}, {location} misses you";
        assert_eq!(
            render_template(template, &customer()),
            render_template(template, &customer())
        );
    }
}
