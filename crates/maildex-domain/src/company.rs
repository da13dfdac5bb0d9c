//! Company derivation from sender domains.

/// Free webmail domains that never yield a company.
pub const FREE_MAIL_DOMAINS: [&str; 5] =
	["gmail.com", "yahoo.com", "hotmail.com", "outlook.com", "icloud.com"];

pub fn domain_of(email: &str) -> Option<String> {
	let (_, domain) = email.rsplit_once('@')?;
	let domain = domain.trim().trim_end_matches('.').to_lowercase();

	if domain.is_empty() { None } else { Some(domain) }
}

pub fn is_free_mail_domain(domain: &str) -> bool {
	FREE_MAIL_DOMAINS.contains(&domain)
}

/// Derives a display name from a company domain: the leading label with its
/// first letter upper-cased ("acme.co.uk" becomes "Acme"). Free webmail
/// domains yield no company at all.
pub fn company_name(domain: &str) -> Option<String> {
	if is_free_mail_domain(domain) {
		return None;
	}

	let label = domain.split('.').next()?.trim();

	if label.is_empty() {
		return None;
	}

	let mut chars = label.chars();
	let first = chars.next()?;

	Some(first.to_uppercase().chain(chars).collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derives_company_from_domain() {
		assert_eq!(company_name("acme.com"), Some("Acme".to_string()));
		assert_eq!(company_name("acme.co.uk"), Some("Acme".to_string()));
	}

	#[test]
	fn free_mail_domains_yield_no_company() {
		for domain in FREE_MAIL_DOMAINS {
			assert_eq!(company_name(domain), None);
		}
	}

	#[test]
	fn extracts_domain_from_address() {
		assert_eq!(domain_of("alice@Acme.COM"), Some("acme.com".to_string()));
		assert_eq!(domain_of("not-an-address"), None);
	}
}
